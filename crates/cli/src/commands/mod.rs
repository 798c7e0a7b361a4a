pub mod delete;
pub mod ingest;
pub mod query;
pub mod sources;

pub use delete::DeleteWhereCommand;
pub use ingest::IngestCommand;
pub use query::QueryCommand;
pub use sources::SourceInfoCommand;

use anyhow::{bail, Result};
use catalog_core::{Filter, RequestContext, Subject};
use clap::Args;

/// Filter options shared by `query` and `delete-where`. All given conditions must hold.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// attribute=value equality, repeatable
    #[arg(long = "where", value_name = "ATTR=VALUE")]
    pub equals: Vec<String>,

    /// Case-insensitive substring match on the title
    #[arg(long)]
    pub title: Option<String>,

    /// Match only these item ids
    #[arg(long = "id")]
    pub ids: Vec<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> Result<Filter> {
        let mut filters = Vec::new();
        for condition in &self.equals {
            let Some((attribute, value)) = condition.split_once('=') else {
                bail!("--where expects ATTR=VALUE, got '{}'", condition);
            };
            filters.push(Filter::equals(attribute.trim(), value.trim()));
        }
        if let Some(title) = &self.title {
            filters.push(Filter::contains(catalog_core::attributes::TITLE, title.clone()));
        }
        if !self.ids.is_empty() {
            filters.push(Filter::ids(self.ids.iter().cloned()));
        }

        Ok(match filters.len() {
            0 => Filter::Any,
            1 => filters.remove(0),
            _ => Filter::And { filters },
        })
    }
}

/// Caller options shared by every command
#[derive(Debug, Clone, Default, Args)]
pub struct ContextArgs {
    /// Explicit destination source, repeatable
    #[arg(long = "source", value_name = "ID")]
    pub destinations: Vec<String>,

    /// Subject name to act as
    #[arg(long)]
    pub subject: Option<String>,

    /// Subject attribute KEY=VALUE, repeatable
    #[arg(long = "attr", value_name = "KEY=VALUE")]
    pub attributes: Vec<String>,
}

impl ContextArgs {
    pub fn to_context(&self) -> Result<RequestContext> {
        let mut context = RequestContext::new().to(self.destinations.iter().cloned());

        if self.subject.is_some() || !self.attributes.is_empty() {
            let mut subject = Subject::new(self.subject.clone().unwrap_or_else(|| "anonymous".to_string()));
            for attribute in &self.attributes {
                let Some((key, value)) = attribute.split_once('=') else {
                    bail!("--attr expects KEY=VALUE, got '{}'", attribute);
                };
                subject = subject.with_attribute(key.trim(), [value.trim()]);
            }
            context = context.as_subject(subject);
        }
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_args_combine_with_and() {
        let args = FilterArgs {
            equals: vec!["kind=draft".to_string()],
            title: Some("report".to_string()),
            ids: Vec::new(),
        };
        match args.to_filter().unwrap() {
            Filter::And { filters } => assert_eq!(filters.len(), 2),
            other => panic!("unexpected filter {other:?}"),
        }
        assert_eq!(FilterArgs::default().to_filter().unwrap(), Filter::Any);
    }

    #[test]
    fn test_malformed_where_is_rejected() {
        let args = FilterArgs {
            equals: vec!["kind".to_string()],
            ..FilterArgs::default()
        };
        assert!(args.to_filter().is_err());
    }

    #[test]
    fn test_context_args_build_subject() {
        let args = ContextArgs {
            destinations: vec!["alpha".to_string()],
            subject: None,
            attributes: vec!["clearance=secret".to_string(), "clearance=public".to_string()],
        };
        let context = args.to_context().unwrap();
        assert!(context.destinations.contains("alpha"));
        let subject = context.subject.unwrap();
        assert_eq!(subject.name, "anonymous");
        assert_eq!(subject.values("clearance").map(|v| v.len()), Some(2));
    }
}
