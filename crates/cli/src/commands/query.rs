use super::{ContextArgs, FilterArgs};
use anyhow::Result;
use catalog_core::{Query, QueryRequest, QueryResponse, SortBy};
use clap::Args;
use common::OperationTimer;
use console::style;
use federation::CatalogFramework;
use std::time::Duration;

#[derive(Debug, Args)]
pub struct QueryCommand {
    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub context: ContextArgs,

    /// Include every federated source
    #[arg(short, long)]
    pub enterprise: bool,

    /// 1-based index of the first result
    #[arg(long, default_value_t = 1)]
    pub start: usize,

    #[arg(long, default_value_t = Query::DEFAULT_PAGE_SIZE)]
    pub size: usize,

    /// Attribute to sort by
    #[arg(long)]
    pub sort: Option<String>,

    #[arg(long, requires = "sort")]
    pub desc: bool,

    /// Per-source timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print the raw response as JSON
    #[arg(long)]
    pub json: bool,
}

impl QueryCommand {
    pub fn to_request(&self) -> Result<QueryRequest> {
        let mut query = Query::new(self.filter.to_filter()?).page(self.start, self.size);
        if let Some(attribute) = &self.sort {
            query = query.sorted_by(if self.desc {
                SortBy::descending(attribute.clone())
            } else {
                SortBy::ascending(attribute.clone())
            });
        }
        if let Some(ms) = self.timeout_ms {
            query = query.with_timeout(Duration::from_millis(ms));
        }

        let mut request = QueryRequest::new(query).in_context(self.context.to_context()?);
        request.enterprise = self.enterprise;
        Ok(request)
    }

    pub async fn execute(&self, framework: &CatalogFramework) -> Result<()> {
        let request = self.to_request()?;
        let timer = OperationTimer::new("query", &common::LogContext::new());
        let result = framework.query(request).await;
        timer.finish_with_result(&result);
        let response = result?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&response)?);
        } else {
            print_response(&response);
        }
        Ok(())
    }
}

fn print_response(response: &QueryResponse) {
    let exactness = if response.hits.exact { "" } else { " (estimated)" };
    println!(
        "{} {} of {} hits{}",
        style("[query]").cyan().bold(),
        response.results.len(),
        response.hits.count,
        exactness
    );
    for item in response.items() {
        println!(
            "  {}  {}  {}",
            style(&item.id).dim(),
            item.title().unwrap_or("<untitled>"),
            style(item.source_id.as_deref().unwrap_or("?")).green()
        );
    }
    for detail in &response.processing_details {
        println!("  {} {}: {}", style("[!]").yellow(), detail.source_id, detail.message);
    }
}
