//! Route, predicate and filter definitions.
//!
//! Definitions are the parsed-but-uncompiled form of a route: a target URI,
//! an evaluation order and named predicate/filter references with their
//! arguments. They are built from configuration (YAML or the textual
//! shortcut form) and compiled into executable routes by the locator.

use std::fmt;

use serde::de::{Error as DeError, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use url::Url;
use uuid::Uuid;

use crate::error::GatewayError;

/// Key prefix assigned to positional shortcut arguments.
const GENERATED_KEY_PREFIX: &str = "_genkey_";

/// Key given to the i-th positional argument of a shortcut definition.
pub(crate) fn generated_key(index: usize) -> String {
    format!("{GENERATED_KEY_PREFIX}{index}")
}

/// Positional index of a generated key, if `key` is one.
pub(crate) fn generated_key_index(key: &str) -> Option<usize> {
    key.strip_prefix(GENERATED_KEY_PREFIX)?.parse().ok()
}

/// Split `name=a, b, c` into a name and trimmed positional arguments.
fn parse_shortcut(text: &str) -> Result<(String, Vec<(String, String)>), GatewayError> {
    let (name, rest) = text.split_once('=').ok_or_else(|| {
        GatewayError::configuration(format!(
            "unable to parse definition text '{text}', must be of the form name=value"
        ))
    })?;
    if name.is_empty() {
        return Err(GatewayError::configuration(format!(
            "unable to parse definition text '{text}', name is empty"
        )));
    }
    let args = rest
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .enumerate()
        .map(|(index, token)| (generated_key(index), token.to_string()))
        .collect();
    Ok((name.to_string(), args))
}

/// A named predicate reference with insertion-ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateDefinition {
    pub name: String,
    pub args: Vec<(String, String)>,
}

impl PredicateDefinition {
    /// Parse the shortcut form, e.g. `Path=/api/**`.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let (name, args) = parse_shortcut(text)?;
        Ok(Self { name, args })
    }
}

/// A named filter reference with insertion-ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDefinition {
    pub name: String,
    pub args: Vec<(String, String)>,
}

impl FilterDefinition {
    /// Parse the shortcut form, e.g. `AddRequestHeader=X-Request-Foo, Bar`.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let (name, args) = parse_shortcut(text)?;
        Ok(Self { name, args })
    }
}

/// Definition of a single route.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteDefinition {
    /// Route identifier; a random UUID when omitted.
    #[serde(default = "random_route_id")]
    pub id: String,
    /// Target URI the terminal routing filters forward to.
    pub uri: Url,
    /// Evaluation order; lower matches first.
    #[serde(default)]
    pub order: i32,
    /// Match conditions; must be non-empty to compile.
    #[serde(default)]
    pub predicates: Vec<PredicateDefinition>,
    /// Per-route filters applied around the terminal dispatch.
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,
}

fn random_route_id() -> String {
    Uuid::new_v4().to_string()
}

impl RouteDefinition {
    /// Parse the route text form `id=uri,pred1,pred2,...`.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let (id, rest) = text.split_once('=').ok_or_else(|| {
            GatewayError::configuration(format!(
                "unable to parse route definition text '{text}', must be of the form name=value"
            ))
        })?;
        if id.is_empty() {
            return Err(GatewayError::configuration(format!(
                "unable to parse route definition text '{text}', id is empty"
            )));
        }
        let mut tokens = rest.split(',').map(str::trim).filter(|t| !t.is_empty());
        let uri = tokens
            .next()
            .ok_or_else(|| {
                GatewayError::configuration(format!("route definition '{id}' is missing a uri"))
            })
            .and_then(|raw| {
                Url::parse(raw).map_err(|error| {
                    GatewayError::configuration(format!("route '{id}' has invalid uri: {error}"))
                })
            })?;
        let predicates = tokens
            .map(PredicateDefinition::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: id.to_string(),
            uri,
            order: 0,
            predicates,
            filters: Vec::new(),
        })
    }
}

/// Both definition kinds deserialize either from the shortcut string form or
/// from a `{ name, args }` mapping, with argument order preserved.
fn deserialize_definition<'de, D, T>(
    deserializer: D,
    kind: &'static str,
    from_parts: fn(String, Vec<(String, String)>) -> T,
    from_text: fn(&str) -> Result<T, GatewayError>,
) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
{
    struct DefinitionVisitor<T> {
        kind: &'static str,
        from_parts: fn(String, Vec<(String, String)>) -> T,
        from_text: fn(&str) -> Result<T, GatewayError>,
    }

    impl<'de, T> Visitor<'de> for DefinitionVisitor<T> {
        type Value = T;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(formatter, "a {} shortcut string or a name/args map", self.kind)
        }

        fn visit_str<E: DeError>(self, value: &str) -> Result<T, E> {
            (self.from_text)(value).map_err(E::custom)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<T, A::Error> {
            let mut name: Option<String> = None;
            let mut args: Vec<(String, String)> = Vec::new();
            while let Some(key) = map.next_key::<String>()? {
                match key.as_str() {
                    "name" => name = Some(map.next_value()?),
                    "args" => args = map.next_value::<ArgsMap>()?.0,
                    other => return Err(A::Error::unknown_field(other, &["name", "args"])),
                }
            }
            let name = name.ok_or_else(|| A::Error::missing_field("name"))?;
            Ok((self.from_parts)(name, args))
        }
    }

    deserializer.deserialize_any(DefinitionVisitor {
        kind,
        from_parts,
        from_text,
    })
}

/// A scalar argument value; everything is carried as a string, the way the
/// shortcut text form does.
#[derive(Deserialize)]
#[serde(untagged)]
enum ArgValue {
    String(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
}

impl ArgValue {
    fn into_string(self) -> String {
        match self {
            ArgValue::String(value) => value,
            ArgValue::Bool(value) => value.to_string(),
            ArgValue::Integer(value) => value.to_string(),
            ArgValue::Float(value) => value.to_string(),
        }
    }
}

/// Argument map that preserves document order.
struct ArgsMap(Vec<(String, String)>);

impl<'de> Deserialize<'de> for ArgsMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ArgsVisitor;

        impl<'de> Visitor<'de> for ArgsVisitor {
            type Value = ArgsMap;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of argument names to scalar values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<ArgsMap, A::Error> {
                let mut args = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, ArgValue>()? {
                    args.push((key, value.into_string()));
                }
                Ok(ArgsMap(args))
            }
        }

        deserializer.deserialize_map(ArgsVisitor)
    }
}

impl<'de> Deserialize<'de> for PredicateDefinition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_definition(
            deserializer,
            "predicate",
            |name, args| PredicateDefinition { name, args },
            PredicateDefinition::parse,
        )
    }
}

impl<'de> Deserialize<'de> for FilterDefinition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_definition(
            deserializer,
            "filter",
            |name, args| FilterDefinition { name, args },
            FilterDefinition::parse,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortcut_args_get_generated_keys() {
        let parsed = PredicateDefinition::parse("Host=a, b ,c").unwrap();
        assert_eq!(parsed.name, "Host");
        assert_eq!(
            parsed.args,
            vec![
                ("_genkey_0".to_string(), "a".to_string()),
                ("_genkey_1".to_string(), "b".to_string()),
                ("_genkey_2".to_string(), "c".to_string()),
            ]
        );
    }

    #[test]
    fn shortcut_without_equals_is_rejected() {
        assert!(PredicateDefinition::parse("Path").is_err());
        assert!(PredicateDefinition::parse("=value").is_err());
        assert!(FilterDefinition::parse("PrefixPath").is_err());
    }

    #[test]
    fn generated_key_round_trip() {
        for index in [0usize, 1, 7, 12] {
            assert_eq!(generated_key_index(&generated_key(index)), Some(index));
        }
        assert_eq!(generated_key_index("regexp"), None);
    }

    #[test]
    fn route_text_form_parses_uri_and_predicates() {
        let route =
            RouteDefinition::parse("route001=http://127.0.0.1,Host=**.example.org,Path=/get")
                .unwrap();
        assert_eq!(route.id, "route001");
        assert_eq!(route.uri.as_str(), "http://127.0.0.1/");
        assert_eq!(route.predicates.len(), 2);
        assert_eq!(route.predicates[0].name, "Host");
        assert_eq!(route.predicates[1].name, "Path");
        assert!(route.filters.is_empty());
    }

    #[test]
    fn yaml_accepts_both_definition_forms() {
        let yaml = r#"
id: r1
uri: http://svc
predicates:
  - Path=/api/**
  - name: Method
    args:
      method: GET
filters:
  - "RewritePath=/api/(?<s>.*), /v2/${s}"
"#;
        let route: RouteDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(route.predicates[0].name, "Path");
        assert_eq!(
            route.predicates[1].args,
            vec![("method".to_string(), "GET".to_string())]
        );
        assert_eq!(route.filters[0].name, "RewritePath");
        assert_eq!(route.filters[0].args.len(), 2);
    }

    #[test]
    fn omitted_route_id_defaults_to_uuid() {
        let route: RouteDefinition = serde_yaml::from_str("uri: http://svc\n").unwrap();
        assert!(Uuid::parse_str(&route.id).is_ok());
    }
}
