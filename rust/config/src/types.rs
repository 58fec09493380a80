//! Small value types shared by the run configuration.

use serde::{Deserialize, Serialize};

/// Differentiable augmentation applied to real and fake images.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum AugType {
    Color,
    Translation,
    Cutout,
}

impl std::fmt::Display for AugType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Color => write!(f, "color"),
            Self::Translation => write!(f, "translation"),
            Self::Cutout => write!(f, "cutout"),
        }
    }
}

impl std::str::FromStr for AugType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "color" => Ok(Self::Color),
            "translation" => Ok(Self::Translation),
            "cutout" => Ok(Self::Cutout),
            _ => Err(format!(
                "unknown augmentation '{s}'. Use: color, translation, cutout"
            )),
        }
    }
}

/// Which checkpoint to resume from.
///
/// On the command line and in config files this is an integer, where `-1`
/// (or the word `latest`) selects the newest checkpoint in the run directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadFrom {
    #[default]
    Latest,
    Step(u64),
}

impl LoadFrom {
    /// Integer form understood by the trainer.
    #[must_use]
    pub fn as_index(self) -> i64 {
        match self {
            Self::Latest => -1,
            Self::Step(n) => i64::try_from(n).unwrap_or(i64::MAX),
        }
    }

    /// Negative indices all mean "latest".
    #[must_use]
    pub fn from_index(index: i64) -> Self {
        u64::try_from(index).map_or(Self::Latest, Self::Step)
    }
}

impl std::fmt::Display for LoadFrom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_index())
    }
}

impl std::str::FromStr for LoadFrom {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        s.parse::<i64>()
            .map(Self::from_index)
            .map_err(|_| format!("invalid checkpoint '{s}', expected an integer or 'latest'"))
    }
}

impl Serialize for LoadFrom {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_index())
    }
}

impl<'de> Deserialize<'de> for LoadFrom {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LoadFromVisitor;

        impl serde::de::Visitor<'_> for LoadFromVisitor {
            type Value = LoadFrom;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a checkpoint number, -1, or \"latest\"")
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<LoadFrom, E> {
                Ok(LoadFrom::from_index(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<LoadFrom, E> {
                Ok(LoadFrom::Step(v))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<LoadFrom, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(LoadFromVisitor)
    }
}
