// Decoded response values and the coercions callers apply to them
use crate::xml_tree::XmlNode;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoercionError {
    #[error("Expected {expected}, found {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: String,
    },

    #[error("Invalid integer: {0}")]
    InvalidInteger(String),

    #[error("Invalid boolean: {0}")]
    InvalidBoolean(String),

    #[error("Invalid JSON payload: {0}")]
    InvalidJson(String),
}

/// Value recovered from one service response.
///
/// Maps keep the order in which the service sent their fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    Map(IndexMap<String, DecodedValue>),
    List(Vec<DecodedValue>),
    Scalar(String),
}

impl Default for DecodedValue {
    fn default() -> Self {
        DecodedValue::empty_map()
    }
}

impl From<&XmlNode> for DecodedValue {
    // Structural copy of a tree node, without any record unwrapping
    fn from(node: &XmlNode) -> Self {
        match node {
            XmlNode::Scalar(text) => DecodedValue::Scalar(text.clone()),
            XmlNode::Mapping(entries) => DecodedValue::Map(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), DecodedValue::from(value)))
                    .collect(),
            ),
            XmlNode::Sequence(items) => {
                DecodedValue::List(items.iter().map(DecodedValue::from).collect())
            }
        }
    }
}

impl From<&str> for DecodedValue {
    fn from(text: &str) -> Self {
        DecodedValue::Scalar(text.to_string())
    }
}

impl DecodedValue {
    pub fn empty_map() -> Self {
        DecodedValue::Map(IndexMap::new())
    }

    // A one-entry map
    pub fn entry(key: impl Into<String>, value: DecodedValue) -> Self {
        let mut map = IndexMap::with_capacity(1);
        map.insert(key.into(), value);
        DecodedValue::Map(map)
    }

    /// True for an empty map, an empty list, or an empty string. The service
    /// answers "nothing found" with any of the three.
    pub fn is_empty(&self) -> bool {
        match self {
            DecodedValue::Map(map) => map.is_empty(),
            DecodedValue::List(items) => items.is_empty(),
            DecodedValue::Scalar(text) => text.is_empty(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DecodedValue::Map(_) => "map",
            DecodedValue::List(_) => "list",
            DecodedValue::Scalar(_) => "scalar",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DecodedValue::Scalar(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, DecodedValue>> {
        match self {
            DecodedValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[DecodedValue]> {
        match self {
            DecodedValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&DecodedValue> {
        self.as_map().and_then(|map| map.get(key))
    }

    pub fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }

    pub fn into_string(self) -> Result<String, CoercionError> {
        match self {
            DecodedValue::Scalar(text) => Ok(text),
            other => Err(other.unexpected("a scalar")),
        }
    }

    // Counts and ids come back as decimal text
    pub fn to_i64(&self) -> Result<i64, CoercionError> {
        let text = self.as_str().ok_or_else(|| self.unexpected("an integer"))?;
        text.trim()
            .parse()
            .map_err(|_| CoercionError::InvalidInteger(text.to_string()))
    }

    pub fn to_bool(&self) -> Result<bool, CoercionError> {
        match self.as_str() {
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            Some(other) => Err(CoercionError::InvalidBoolean(other.to_string())),
            None => Err(self.unexpected("a boolean")),
        }
    }

    /// Flattens a scalar or the values of a map/list into strings. A single
    /// answer arrives as a bare scalar, several arrive as an index-keyed map.
    pub fn scalar_values(&self) -> Result<Vec<String>, CoercionError> {
        let values: Vec<&DecodedValue> = match self {
            DecodedValue::Scalar(text) if text.is_empty() => return Ok(Vec::new()),
            DecodedValue::Scalar(text) => return Ok(vec![text.clone()]),
            DecodedValue::Map(map) => map.values().collect(),
            DecodedValue::List(items) => items.iter().collect(),
        };

        values
            .into_iter()
            .map(|value| {
                value
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| value.unexpected("a scalar"))
            })
            .collect()
    }

    // Some endpoints return a JSON document inside the scalar
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, CoercionError> {
        let text = self.as_str().ok_or_else(|| self.unexpected("a JSON string"))?;
        serde_json::from_str(text).map_err(|e| CoercionError::InvalidJson(e.to_string()))
    }

    fn unexpected(&self, expected: &'static str) -> CoercionError {
        CoercionError::UnexpectedShape {
            expected,
            found: self.render(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use test_case::test_case;

    fn map(entries: &[(&str, &str)]) -> DecodedValue {
        DecodedValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), DecodedValue::from(*v)))
                .collect(),
        )
    }

    #[test_case(DecodedValue::empty_map(), true; "#1 Empty map")]
    #[test_case(DecodedValue::List(vec![]), true; "#2 Empty list")]
    #[test_case(DecodedValue::from(""), true; "#3 Empty scalar")]
    #[test_case(DecodedValue::from("0"), false; "#4 Zero is content")]
    #[test_case(map(&[("a", "")]), false; "#5 Map with an empty value")]
    fn test_is_empty(value: DecodedValue, expected: bool) {
        assert_eq!(value.is_empty(), expected);
    }

    #[test]
    fn test_integer_coercion() {
        assert_eq!(DecodedValue::from("42").to_i64(), Ok(42));
        assert_eq!(DecodedValue::from(" 7 ").to_i64(), Ok(7));
        assert_eq!(
            DecodedValue::from("false").to_i64(),
            Err(CoercionError::InvalidInteger("false".to_string()))
        );
        assert!(matches!(
            map(&[("count", "1")]).to_i64(),
            Err(CoercionError::UnexpectedShape { expected: "an integer", .. })
        ));
    }

    #[test]
    fn test_boolean_coercion() {
        assert_eq!(DecodedValue::from("true").to_bool(), Ok(true));
        assert_eq!(DecodedValue::from("false").to_bool(), Ok(false));
        assert_eq!(
            DecodedValue::from("1").to_bool(),
            Err(CoercionError::InvalidBoolean("1".to_string()))
        );
    }

    #[test]
    fn test_scalar_values() {
        assert_eq!(
            DecodedValue::from("a@example.com").scalar_values().unwrap(),
            vec!["a@example.com"]
        );
        assert_eq!(
            map(&[("0", "a@example.com"), ("1", "b@example.com")])
                .scalar_values()
                .unwrap(),
            vec!["a@example.com", "b@example.com"]
        );
        assert!(DecodedValue::from("").scalar_values().unwrap().is_empty());

        let nested = DecodedValue::entry("0", map(&[("x", "y")]));
        assert!(nested.scalar_values().is_err());
    }

    #[test]
    fn test_parse_json_payload() {
        #[derive(Deserialize)]
        struct Recipients {
            email: Vec<String>,
        }

        let value = DecodedValue::from(r#"{"email":["a@example.com","b@example.com"]}"#);
        let parsed: Recipients = value.parse_json().unwrap();
        assert_eq!(parsed.email.len(), 2);

        let broken = DecodedValue::from("{not json");
        assert!(matches!(
            broken.parse_json::<Recipients>(),
            Err(CoercionError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_serializes_untagged() {
        let mut value = map(&[("3", "ENG")]);
        if let DecodedValue::Map(entries) = &mut value {
            entries.insert(
                "list".to_string(),
                DecodedValue::List(vec![DecodedValue::from("x")]),
            );
        }
        assert_eq!(value.render(), r#"{"3":"ENG","list":["x"]}"#);
    }

    #[test]
    fn test_from_tree_is_structural() {
        let node = XmlNode::Sequence(vec![XmlNode::Mapping(vec![(
            "item".to_string(),
            XmlNode::Scalar("a".to_string()),
        )])]);
        assert_eq!(
            DecodedValue::from(&node),
            DecodedValue::List(vec![DecodedValue::entry("item", DecodedValue::from("a"))])
        );
    }
}
