// Reference tables (languages, countries, categories) used to check call
// arguments before they reach the service.
use crate::decoded::{CoercionError, DecodedValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered, read-only `id -> name` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogTable {
    entries: IndexMap<String, String>,
}

impl CatalogTable {
    /// Builds a table from a decoded `id -> name` map. The service answers an
    /// empty table with an empty string.
    pub fn from_decoded(value: &DecodedValue) -> Result<Self, CoercionError> {
        let map = match value {
            DecodedValue::Scalar(text) if text.is_empty() => return Ok(Self::default()),
            DecodedValue::Map(map) => map,
            other => {
                return Err(CoercionError::UnexpectedShape {
                    expected: "an id to name map",
                    found: other.render(),
                })
            }
        };

        let entries = map
            .iter()
            .map(|(id, name)| match name.as_str() {
                Some(name) => Ok((id.clone(), name.to_string())),
                None => Err(CoercionError::UnexpectedShape {
                    expected: "a name",
                    found: name.render(),
                }),
            })
            .collect::<Result<IndexMap<_, _>, _>>()?;

        Ok(Self { entries })
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(id, name)| (id.as_str(), name.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CatalogTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(id, name)| (id.into(), name.into()))
                .collect(),
        }
    }
}

// Built once, then shared immutably
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub languages: CatalogTable,
    pub countries: CatalogTable,
    pub categories: CatalogTable,
}

impl Catalog {
    // Loads tables exported earlier, e.g. `{"languages": {"3": "ENG"}, ...}`
    pub fn from_json(json: &str) -> Result<Self, CoercionError> {
        serde_json::from_str(json).map_err(|e| CoercionError::InvalidJson(e.to_string()))
    }

    pub fn contains_language(&self, id: &str) -> bool {
        self.languages.contains(id)
    }

    // ISO-3 country code
    pub fn contains_country(&self, code: &str) -> bool {
        self.countries.contains(code)
    }

    pub fn contains_category(&self, id: &str) -> bool {
        self.categories.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::decode;

    #[test]
    fn test_table_from_languages_response() {
        let value = decode(include_bytes!("../samples/languages_response.xml")).unwrap();
        let table = CatalogTable::from_decoded(&value).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.get("3"), Some("ENG"));
        assert_eq!(
            table.iter().map(|(id, _)| id).collect::<Vec<_>>(),
            vec!["1", "2", "3"]
        );
    }

    #[test]
    fn test_empty_answer_is_an_empty_table() {
        let table = CatalogTable::from_decoded(&DecodedValue::from("")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_rejects_non_table_values() {
        assert!(matches!(
            CatalogTable::from_decoded(&DecodedValue::from("default")),
            Err(CoercionError::UnexpectedShape { expected: "an id to name map", .. })
        ));

        let nested = DecodedValue::entry("1", DecodedValue::entry("name", DecodedValue::from("x")));
        assert!(matches!(
            CatalogTable::from_decoded(&nested),
            Err(CoercionError::UnexpectedShape { expected: "a name", .. })
        ));
    }

    #[test]
    fn test_catalog_from_json() {
        let catalog = Catalog::from_json(
            r#"{"languages": {"3": "ENG", "1": "ESP"}, "countries": {"DEU": "Germany"}}"#,
        )
        .unwrap();

        assert!(catalog.contains_language("3"));
        assert!(!catalog.contains_language("4"));
        assert!(catalog.contains_country("DEU"));
        assert!(catalog.categories.is_empty());
        assert_eq!(
            catalog.languages.iter().next(),
            Some(("3", "ENG"))
        );

        assert!(matches!(
            Catalog::from_json(r#"{"languages": ["ENG"]}"#),
            Err(CoercionError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_collect_into_table() {
        let table: CatalogTable = [("1", "Newsletter"), ("2", "Promotions")]
            .into_iter()
            .collect();
        assert!(table.contains("2"));
        assert_eq!(table.get("1"), Some("Newsletter"));
    }
}
