use serde::{Deserialize, Serialize};

/// Learner's self-reported recall quality on the canonical 4-point scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Rating {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid rating: {0}")]
pub struct InvalidRating(pub i64);

impl Rating {
    pub const ALL: [Rating; 4] = [Rating::Again, Rating::Hard, Rating::Good, Rating::Easy];

    pub fn value(self) -> i64 {
        self as i64
    }

    /// Good and Easy count as a correct answer.
    pub fn is_correct(self) -> bool {
        self >= Rating::Good
    }

    /// Maps a legacy 1-5 quality score onto the 4-point scale.
    ///
    /// Only callers at the external boundary should need this; everything
    /// past it speaks `Rating`.
    pub fn from_five_point(quality: i64) -> Result<Self, InvalidRating> {
        match quality {
            1 => Ok(Self::Again),
            2 => Ok(Self::Hard),
            3 => Ok(Self::Good),
            4 | 5 => Ok(Self::Easy),
            other => Err(InvalidRating(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Again => "again",
            Self::Hard => "hard",
            Self::Good => "good",
            Self::Easy => "easy",
        }
    }
}

impl TryFrom<i64> for Rating {
    type Error = InvalidRating;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Again),
            2 => Ok(Self::Hard),
            3 => Ok(Self::Good),
            4 => Ok(Self::Easy),
            other => Err(InvalidRating(other)),
        }
    }
}

impl From<Rating> for i64 {
    fn from(rating: Rating) -> Self {
        rating.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_values() {
        assert_eq!(Rating::try_from(0), Err(InvalidRating(0)));
        assert_eq!(Rating::try_from(5), Err(InvalidRating(5)));
        assert_eq!(Rating::try_from(-3), Err(InvalidRating(-3)));
        assert_eq!(Rating::try_from(3), Ok(Rating::Good));
    }

    #[test]
    fn five_point_mapping_is_explicit() {
        assert_eq!(Rating::from_five_point(5), Ok(Rating::Easy));
        assert_eq!(Rating::from_five_point(4), Ok(Rating::Easy));
        assert_eq!(Rating::from_five_point(1), Ok(Rating::Again));
        assert!(Rating::from_five_point(6).is_err());
        assert!(Rating::from_five_point(0).is_err());
    }

    #[test]
    fn correctness_threshold() {
        assert!(!Rating::Again.is_correct());
        assert!(!Rating::Hard.is_correct());
        assert!(Rating::Good.is_correct());
        assert!(Rating::Easy.is_correct());
    }

    #[test]
    fn serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Rating::Hard).unwrap(), "2");
        let parsed: Rating = serde_json::from_str("4").unwrap();
        assert_eq!(parsed, Rating::Easy);
        assert!(serde_json::from_str::<Rating>("7").is_err());
    }
}
