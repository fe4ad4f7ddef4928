//! Input model: teams and the repositories they own

use anyhow::{Context, Result};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::io::Read;

/// A CI team and the repositories it needs deploy keys for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub read_only: BooleanString,
}

/// Boolean that also accepts "true"/"false"/"1"/"0" strings, as emitted by
/// infrastructure tooling that serialises every value as a string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BooleanString(pub bool);

impl From<BooleanString> for bool {
    fn from(value: BooleanString) -> Self {
        value.0
    }
}

impl From<bool> for BooleanString {
    fn from(value: bool) -> Self {
        BooleanString(value)
    }
}

impl Serialize for BooleanString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bool(self.0)
    }
}

impl<'de> Deserialize<'de> for BooleanString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct BooleanStringVisitor;

        impl<'de> Visitor<'de> for BooleanStringVisitor {
            type Value = BooleanString;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a boolean or one of \"true\", \"false\", \"1\", \"0\"")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Self::Value, E> {
                Ok(BooleanString(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                match v.trim().to_lowercase().as_str() {
                    "true" | "1" => Ok(BooleanString(true)),
                    "false" | "0" => Ok(BooleanString(false)),
                    _ => Err(E::invalid_value(de::Unexpected::Str(v), &self)),
                }
            }
        }

        deserializer.deserialize_any(BooleanStringVisitor)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TeamsDocument {
    Many(Vec<Team>),
    One(Team),
}

/// Load teams from a JSON document holding either a single team or an array of teams
pub fn load_teams<R: Read>(reader: R) -> Result<Vec<Team>> {
    let document: TeamsDocument =
        serde_json::from_reader(reader).context("Failed to parse teams JSON")?;

    Ok(match document {
        TeamsDocument::Many(teams) => teams,
        TeamsDocument::One(team) => vec![team],
    })
}
