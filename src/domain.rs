use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// one complete measurement from one sensor
///
/// fields are kept ordered by name, so a dht11 reading serializes as
/// `{"rel": 45.0, "temp": 21.5}`. there is no timestamp: the node only
/// ever holds the latest value and does not judge staleness.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorReading {
    fields: BTreeMap<String, f64>,
}

impl SensorReading {
    pub fn new() -> Self {
        Self::default()
    }

    /// builder-style field insert, used by drivers to populate a reading
    /// in one go before it is handed to the store
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for SensorReading {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_iterate_in_name_order() {
        let reading = SensorReading::new().with("temp", 21.5).with("rel", 45.0);
        let names: Vec<_> = reading.fields().map(|(name, _)| name).collect();
        assert_eq!(names, ["rel", "temp"]);
    }

    #[test]
    fn serializes_as_a_plain_map() {
        let reading: SensorReading = [("temp", 21.5), ("rel", 45.0)].into_iter().collect();
        let json = serde_json::to_string(&reading).unwrap();
        assert_eq!(json, r#"{"rel":45.0,"temp":21.5}"#);
    }
}
