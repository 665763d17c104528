use regex::Regex;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

const INTEGRAL_TOLERANCE: f64 = 1e-6;

/// Marker-parse failures. Each kind keeps its distinguishing text so retry
/// exhaustion still tells the operator what the model actually did.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RankingError {
    #[error("response does not contain `{keyword} = <score>`")]
    MissingMarker { keyword: String },
    #[error("score {value} is not a whole number")]
    Fractional { value: f64 },
    #[error("score {value} is outside the 1-5 scale")]
    OutOfRange { value: i64 },
}

/// Locates `KEYWORD = <numeric literal>` in model output and validates the
/// literal as an integer in the closed scoring range.
pub struct RankingParser {
    keyword: String,
    marker: Regex,
}

impl RankingParser {
    pub fn new(keyword: &str) -> Self {
        let pattern = format!(r"{}\s*=\s*(-?\d+(?:\.\d+)?)", regex::escape(keyword));
        let marker = Regex::new(&pattern).expect("escaped keyword forms a valid pattern");
        Self {
            keyword: keyword.to_string(),
            marker,
        }
    }

    pub fn parse(&self, response: &str) -> Result<u8, RankingError> {
        let captures = self
            .marker
            .captures(response)
            .ok_or_else(|| RankingError::MissingMarker {
                keyword: self.keyword.clone(),
            })?;
        let value: f64 = captures[1]
            .parse()
            .map_err(|_| RankingError::MissingMarker {
                keyword: self.keyword.clone(),
            })?;

        let rounded = value.round();
        if (value - rounded).abs() > INTEGRAL_TOLERANCE {
            return Err(RankingError::Fractional { value });
        }

        let score = rounded as i64;
        if !(i64::from(MIN_SCORE)..=i64::from(MAX_SCORE)).contains(&score) {
            return Err(RankingError::OutOfRange { value: score });
        }
        Ok(score as u8)
    }
}
