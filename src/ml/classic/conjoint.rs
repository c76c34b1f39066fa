//! Raw conjoint rows, dummy coding into an [`ObservationTable`], and a simulator
//! for choice data with known part-worths.

use rand::distributions::Open01;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};
use crate::ml::classic::multinomial_logit::{AlternativeRow, ObservationTable, TaskKey};

/// One alternative as it appears in a raw conjoint table.
#[derive(Debug, Clone, PartialEq)]
pub struct ConjointRow {
    pub respondent: u32,
    pub task: u32,
    pub brand: String,
    pub ad: String,
    pub price: f64,
    /// 1 when this alternative was chosen, else 0.
    pub choice: u8,
}

/// Treatment coding of one categorical column: levels are sorted, the first one is
/// the reference, and every other level gets an indicator column.
#[derive(Debug, Clone, PartialEq)]
pub struct DummyCoder {
    column: &'static str,
    levels: Vec<String>,
}

impl DummyCoder {
    /// Learns the levels of `column` from its values.
    pub fn fit<'a>(column: &'static str, values: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut levels: Vec<String> = values.into_iter().map(str::to_owned).collect();
        levels.sort();
        levels.dedup();
        if levels.is_empty() {
            return Err(Error::EmptyInput);
        }
        Ok(Self { column, levels })
    }

    pub fn reference(&self) -> &str {
        &self.levels[0]
    }

    /// Names of the indicator columns, `column_level` for each non-reference level.
    pub fn indicator_names(&self) -> Vec<String> {
        self.levels[1..]
            .iter()
            .map(|level| format!("{}_{}", self.column, level))
            .collect()
    }

    /// Indicator values for `value`; all zeros for the reference level.
    pub fn encode(&self, value: &str) -> Result<Vec<f64>> {
        let position = self
            .levels
            .iter()
            .position(|level| level == value)
            .ok_or_else(|| Error::UnknownLevel {
                column: self.column,
                level: value.to_owned(),
            })?;
        Ok((1..self.levels.len())
            .map(|i| if i == position { 1.0 } else { 0.0 })
            .collect())
    }
}

/// Encodes raw rows into the `[brand indicators.., ad indicators.., price]` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ConjointEncoder {
    brand: DummyCoder,
    ad: DummyCoder,
}

impl ConjointEncoder {
    pub fn fit(rows: &[ConjointRow]) -> Result<Self> {
        Ok(Self {
            brand: DummyCoder::fit("brand", rows.iter().map(|r| r.brand.as_str()))?,
            ad: DummyCoder::fit("ad", rows.iter().map(|r| r.ad.as_str()))?,
        })
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names = self.brand.indicator_names();
        names.extend(self.ad.indicator_names());
        names.push("price".to_string());
        names
    }

    pub fn encode_row(&self, row: &ConjointRow) -> Result<AlternativeRow> {
        let chosen = match row.choice {
            0 => false,
            1 => true,
            value => return Err(Error::InvalidChoiceFlag { value }),
        };
        let mut features = self.brand.encode(&row.brand)?;
        features.extend(self.ad.encode(&row.ad)?);
        features.push(row.price);
        Ok(AlternativeRow {
            key: TaskKey::new(row.respondent, row.task),
            features,
            chosen,
        })
    }

    pub fn encode(&self, rows: &[ConjointRow]) -> Result<ObservationTable> {
        let encoded = rows
            .iter()
            .map(|row| self.encode_row(row))
            .collect::<Result<Vec<_>>>()?;
        ObservationTable::from_rows(encoded)
    }
}

/// Design and true part-worths of a simulated conjoint study.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub respondents: u32,
    pub tasks: u32,
    pub alternatives: usize,
    /// Brand levels with their part-worths.
    pub brands: Vec<(String, f64)>,
    /// Ad levels with their part-worths.
    pub ads: Vec<(String, f64)>,
    pub prices: Vec<f64>,
    /// Utility change per unit of price.
    pub price_coefficient: f64,
}

impl Default for SimulationConfig {
    /// 100 respondents, 10 tasks of 3 alternatives; brands N (1.0), P (0.5) and
    /// H (0.0); ads Yes (-0.8) and No (0.0); prices 8 to 32 in steps of 4 at
    /// -0.1 per unit.
    fn default() -> Self {
        Self {
            respondents: 100,
            tasks: 10,
            alternatives: 3,
            brands: vec![
                ("N".to_string(), 1.0),
                ("P".to_string(), 0.5),
                ("H".to_string(), 0.0),
            ],
            ads: vec![("Yes".to_string(), -0.8), ("No".to_string(), 0.0)],
            prices: (0..7).map(|i| 8.0 + 4.0 * i as f64).collect(),
            price_coefficient: -0.1,
        }
    }
}

impl SimulationConfig {
    /// Coefficients in the encoder's layout (levels sorted, first level as reference):
    /// the quantities an estimator fitted on simulated data should recover.
    pub fn true_coefficients(&self) -> Vec<f64> {
        fn relative(levels: &[(String, f64)]) -> Vec<f64> {
            let mut sorted: Vec<&(String, f64)> = levels.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            let reference = sorted.first().map_or(0.0, |l| l.1);
            sorted.iter().skip(1).map(|l| l.1 - reference).collect()
        }
        let mut beta = relative(&self.brands);
        beta.extend(relative(&self.ads));
        beta.push(self.price_coefficient);
        beta
    }
}

#[derive(Debug, Clone, Copy)]
struct Profile<'a> {
    brand: &'a (String, f64),
    ad: &'a (String, f64),
    price: f64,
}

/// Simulates raw conjoint rows. Each task shows `alternatives` distinct profiles
/// drawn from the full brand x ad x price grid; the respondent picks the profile
/// with the highest utility plus a standard Gumbel error.
pub fn simulate_conjoint<R: Rng + ?Sized>(
    config: &SimulationConfig,
    rng: &mut R,
) -> Result<Vec<ConjointRow>> {
    if config.brands.is_empty() || config.ads.is_empty() || config.prices.is_empty() {
        return Err(Error::EmptyInput);
    }
    let profiles: Vec<Profile> = config
        .brands
        .iter()
        .flat_map(|brand| {
            config.ads.iter().flat_map(move |ad| {
                config
                    .prices
                    .iter()
                    .map(move |&price| Profile { brand, ad, price })
            })
        })
        .collect();
    if config.alternatives < 2 || config.alternatives > profiles.len() {
        return Err(Error::invalid(
            "alternatives",
            format!(
                "{} alternatives requested from {} distinct profiles",
                config.alternatives,
                profiles.len()
            ),
        ));
    }

    let capacity = config.respondents as usize * config.tasks as usize * config.alternatives;
    let mut rows = Vec::with_capacity(capacity);
    for respondent in 1..=config.respondents {
        for task in 1..=config.tasks {
            let shown: Vec<Profile> = profiles
                .choose_multiple(rng, config.alternatives)
                .copied()
                .collect();
            let utilities: Vec<f64> = shown
                .iter()
                .map(|p| {
                    let u: f64 = rng.sample(Open01);
                    let gumbel = -(-u.ln()).ln();
                    p.brand.1 + p.ad.1 + config.price_coefficient * p.price + gumbel
                })
                .collect();
            let best = utilities
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map_or(0, |(j, _)| j);

            rows.extend(shown.iter().enumerate().map(|(j, p)| ConjointRow {
                respondent,
                task,
                brand: p.brand.0.clone(),
                ad: p.ad.0.clone(),
                price: p.price,
                choice: u8::from(j == best),
            }));
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeded_rng;

    fn raw(respondent: u32, task: u32, brand: &str, ad: &str, price: f64, choice: u8) -> ConjointRow {
        ConjointRow {
            respondent,
            task,
            brand: brand.to_string(),
            ad: ad.to_string(),
            price,
            choice,
        }
    }

    #[test]
    fn test_dummy_coder() {
        let coder = DummyCoder::fit("brand", ["P", "N", "H", "N"]).unwrap();
        assert_eq!(coder.reference(), "H");
        assert_eq!(coder.indicator_names(), vec!["brand_N", "brand_P"]);
        assert_eq!(coder.encode("H").unwrap(), vec![0.0, 0.0]);
        assert_eq!(coder.encode("N").unwrap(), vec![1.0, 0.0]);
        assert_eq!(coder.encode("P").unwrap(), vec![0.0, 1.0]);
        assert_eq!(
            coder.encode("D").unwrap_err(),
            Error::UnknownLevel {
                column: "brand",
                level: "D".to_string()
            }
        );
        assert!(DummyCoder::fit("ad", std::iter::empty()).is_err());
    }

    #[test]
    fn test_encoder_layout() {
        let rows = vec![
            raw(1, 1, "N", "Yes", 28.0, 1),
            raw(1, 1, "H", "Yes", 16.0, 0),
            raw(1, 1, "P", "No", 16.0, 0),
        ];
        let encoder = ConjointEncoder::fit(&rows).unwrap();
        assert_eq!(
            encoder.feature_names(),
            vec!["brand_N", "brand_P", "ad_Yes", "price"]
        );
        let table = encoder.encode(&rows).unwrap();
        let x = table.tasks()[0].features();
        assert_eq!(x.row(0).to_vec(), vec![1.0, 0.0, 1.0, 28.0]);
        assert_eq!(x.row(1).to_vec(), vec![0.0, 0.0, 1.0, 16.0]);
        assert_eq!(x.row(2).to_vec(), vec![0.0, 1.0, 0.0, 16.0]);
        assert_eq!(table.tasks()[0].chosen(), 0);
    }

    #[test]
    fn test_encoder_rejects_bad_flag() {
        let rows = vec![raw(1, 1, "N", "Yes", 8.0, 2), raw(1, 1, "H", "No", 8.0, 0)];
        let encoder = ConjointEncoder::fit(&rows).unwrap();
        assert_eq!(
            encoder.encode(&rows).unwrap_err(),
            Error::InvalidChoiceFlag { value: 2 }
        );
    }

    #[test]
    fn test_true_coefficients() {
        let config = SimulationConfig::default();
        assert_eq!(config.true_coefficients(), vec![1.0, 0.5, -0.8, -0.1]);
    }

    #[test]
    fn test_simulation_shape() {
        let config = SimulationConfig {
            respondents: 5,
            tasks: 4,
            ..SimulationConfig::default()
        };
        let mut rng = seeded_rng(Some(3));
        let rows = simulate_conjoint(&config, &mut rng).unwrap();
        assert_eq!(rows.len(), 5 * 4 * 3);

        let table = ConjointEncoder::fit(&rows).unwrap().encode(&rows).unwrap();
        assert_eq!(table.n_tasks(), 20);
        assert_eq!(table.n_alternatives(), 3);
        assert_eq!(table.n_features(), 4);

        // Profiles within a task are distinct.
        for chunk in rows.chunks(3) {
            for i in 0..3 {
                for j in (i + 1)..3 {
                    assert!(
                        chunk[i].brand != chunk[j].brand
                            || chunk[i].ad != chunk[j].ad
                            || chunk[i].price != chunk[j].price
                    );
                }
            }
        }
    }

    #[test]
    fn test_simulation_rejects_bad_design() {
        let mut rng = seeded_rng(None);
        let config = SimulationConfig {
            alternatives: 1,
            ..SimulationConfig::default()
        };
        assert!(simulate_conjoint(&config, &mut rng).is_err());
        let config = SimulationConfig {
            prices: vec![],
            ..SimulationConfig::default()
        };
        assert!(simulate_conjoint(&config, &mut rng).is_err());
    }
}
