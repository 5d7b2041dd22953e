//! Desired-topology input types.
//!
//! A topology spec is a list of master groups, each a comma-separated list
//! of `host[:port]` endpoints. The first member of a group is the preferred
//! master; the rest are its preferred replicas.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Default Redis client port.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Errors that can occur while parsing a topology spec.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("a redis instance cannot be empty")]
    EmptyInstance,

    #[error("parsing \"{input}\": too many components")]
    TooManyComponents { input: String },

    #[error("parsing \"{input}\": invalid port \"{port}\"")]
    InvalidPort { input: String, port: String },

    #[error("parsing part {index}: {source}")]
    InvalidGroupPart {
        index: usize,
        #[source]
        source: Box<SpecError>,
    },
}

/// An addressable Redis endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RedisInstance {
    pub hostname: String,
    pub port: u16,
}

impl RedisInstance {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl FromStr for RedisInstance {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.is_empty() {
            return Err(SpecError::EmptyInstance);
        }

        let mut components = s.split(':');
        let hostname = components.next().unwrap_or_default().trim().to_string();

        let port = match components.next() {
            Some(part) => part.trim().parse().map_err(|_| SpecError::InvalidPort {
                input: s.to_string(),
                port: part.to_string(),
            })?,
            None => DEFAULT_REDIS_PORT,
        };

        if components.next().is_some() {
            return Err(SpecError::TooManyComponents {
                input: s.to_string(),
            });
        }

        Ok(Self { hostname, port })
    }
}

impl fmt::Display for RedisInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// An ordered list of Redis instances that should form one replication unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterGroup(Vec<RedisInstance>);

impl MasterGroup {
    pub fn new(instances: Vec<RedisInstance>) -> Self {
        Self(instances)
    }

    /// The preferred master: the first instance of the group.
    pub fn leader(&self) -> Option<&RedisInstance> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RedisInstance> {
        self.0.iter()
    }

    pub fn contains(&self, instance: &RedisInstance) -> bool {
        self.0.contains(instance)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for MasterGroup {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.is_empty() {
            return Ok(Self::default());
        }

        let instances = s
            .split(',')
            .enumerate()
            .map(|(index, part)| {
                part.parse().map_err(|e| SpecError::InvalidGroupPart {
                    index,
                    source: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self(instances))
    }
}

impl fmt::Display for MasterGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instance) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", instance)?;
        }

        Ok(())
    }
}

impl<'a> IntoIterator for &'a MasterGroup {
    type Item = &'a RedisInstance;
    type IntoIter = std::slice::Iter<'a, RedisInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instance_default_port() {
        let instance: RedisInstance = "myredis-0-1".parse().unwrap();
        assert_eq!(instance, RedisInstance::new("myredis-0-1", 6379));
        assert_eq!(instance.to_string(), "myredis-0-1:6379");
    }

    #[test]
    fn test_parse_instance_explicit_port() {
        let instance: RedisInstance = "myredis-0-1:6380".parse().unwrap();
        assert_eq!(instance, RedisInstance::new("myredis-0-1", 6380));
        assert_eq!(instance.to_string(), "myredis-0-1:6380");
    }

    #[test]
    fn test_parse_instance_round_trip() {
        let instance: RedisInstance = "host:6380".parse().unwrap();
        let reparsed: RedisInstance = instance.to_string().parse().unwrap();
        assert_eq!(instance, reparsed);
    }

    #[test]
    fn test_parse_instance_invalid() {
        assert!("".parse::<RedisInstance>().is_err());
        assert!("   ".parse::<RedisInstance>().is_err());
        assert!("host:6380:bug".parse::<RedisInstance>().is_err());
        assert!("host:notaport".parse::<RedisInstance>().is_err());
    }

    #[test]
    fn test_parse_group_empty() {
        let group: MasterGroup = "".parse().unwrap();
        assert!(group.is_empty());
        assert_eq!(group.to_string(), "");
    }

    #[test]
    fn test_parse_group() {
        let group: MasterGroup = "myredis-0-1:6380,myredis-0-2".parse().unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(
            group.leader(),
            Some(&RedisInstance::new("myredis-0-1", 6380))
        );
        assert_eq!(group.to_string(), "myredis-0-1:6380,myredis-0-2:6379");
    }

    #[test]
    fn test_parse_group_invalid_part() {
        let err = "a,b:bad,c".parse::<MasterGroup>().unwrap_err();
        assert!(err.to_string().contains("part 1"));
    }
}
