//! Defines helper methods for Serializing and Deserializing external types.
use std::{str::FromStr, time::Duration};

use log::LevelFilter;
use serde::{Deserialize, Deserializer, de};

//------------ LevelFilter ---------------------------------------------------

pub fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}

//------------ Duration ------------------------------------------------------

/// Reads a whole number of seconds, refusing zero.
pub fn de_seconds<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(d)?;
    if secs == 0 {
        return Err(de::Error::custom("expected a positive number of seconds"));
    }
    Ok(Duration::from_secs(secs))
}
