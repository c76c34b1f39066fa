pub mod metropolis_hastings;
