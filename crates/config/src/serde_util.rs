//! Serde helpers shared by the config types.

/// (De)serializes `HashMap<String, Duration>` values in humantime form
/// (`10s`, `4m`), matching the plain duration fields.
pub(crate) mod humantime_map {
    use std::{collections::HashMap, time::Duration};

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub(crate) fn serialize<S>(
        map: &HashMap<String, Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        map.iter()
            .map(|(key, value)| (key, humantime_serde::Serde::from(*value)))
            .collect::<HashMap<_, _>>()
            .serialize(serializer)
    }

    pub(crate) fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<HashMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = HashMap::<String, humantime_serde::Serde<Duration>>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|(key, value)| (key, value.into_inner())).collect())
    }
}
