use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::function::FunctionId;
use crate::path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod { Get, Put, Post, Delete, Patch, Head, Options, Any }

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Any => "ANY",
        }
    }

    /// Method component of an execute-api source ARN.
    pub fn arn_segment(&self) -> &'static str {
        match self { HttpMethod::Any => "*", other => other.as_str() }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "PUT" => Ok(HttpMethod::Put),
            "POST" => Ok(HttpMethod::Post),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            "ANY" => Ok(HttpMethod::Any),
            _ => Err(format!("unsupported HTTP method '{}'", s)),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

impl From<HttpMethod> for String {
    fn from(m: HttpMethod) -> Self { m.as_str().to_string() }
}

/// HTTP route bound to a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTrigger {
    pub function: FunctionId,
    pub method: HttpMethod,
    pub path: String,
    pub content_type: String,
}

impl ApiTrigger {
    pub fn new(function: FunctionId, method: HttpMethod, route: &str, content_type: impl Into<String>) -> Self {
        Self { function, method, path: path::normalize(route), content_type: content_type.into() }
    }
}

/// Schedule rule bound to a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrigger {
    pub function: FunctionId,
    pub name: String,
    pub description: String,
    /// `rate(..)` or `cron(..)` expression, passed through verbatim.
    pub schedule: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    Api(ApiTrigger),
    Event(EventTrigger),
}

impl Trigger {
    pub fn function(&self) -> FunctionId {
        match self {
            Trigger::Api(t) => t.function,
            Trigger::Event(t) => t.function,
        }
    }

    pub fn is_api(&self) -> bool { matches!(self, Trigger::Api(_)) }
}

impl From<ApiTrigger> for Trigger {
    fn from(t: ApiTrigger) -> Self { Trigger::Api(t) }
}

impl From<EventTrigger> for Trigger {
    fn from(t: EventTrigger) -> Self { Trigger::Event(t) }
}
