use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;

use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// A GraphQL execution result.
///
/// Immutable once produced by the engine: the gateway only forwards it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    /// Constructor
    #[builder(visibility = "pub")]
    fn new(data: Option<Value>, errors: Vec<Error>, extensions: Map<ByteString, Value>) -> Self {
        Self {
            data,
            errors,
            extensions,
        }
    }

    /// A response is a failure when it carries errors and no data at all.
    pub fn is_failure(&self) -> bool {
        self.data.is_none() && !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn test_response_without_errors() {
        let response = Response::builder()
            .data(json!({ "todos": [{ "title": "write tests" }] }))
            .build();

        assert!(!response.is_failure());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({ "data": { "todos": [{ "title": "write tests" }] } })
        );
    }

    #[test]
    fn test_response_with_errors_only() {
        let response: Response =
            serde_json::from_str(r#"{"errors":[{"message":"no such field"}]}"#).unwrap();

        assert!(response.is_failure());
        assert_eq!(response.errors[0].message, "no such field");
    }
}
