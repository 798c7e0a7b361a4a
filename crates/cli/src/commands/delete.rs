use super::{ContextArgs, FilterArgs};
use anyhow::{bail, Result};
use catalog_core::{DeleteByFilterRequest, Filter};
use clap::Args;
use common::OperationTimer;
use console::style;
use federation::CatalogFramework;

#[derive(Debug, Args)]
pub struct DeleteWhereCommand {
    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub context: ContextArgs,

    /// Required to delete with no filter conditions
    #[arg(long)]
    pub all: bool,

    #[arg(long)]
    pub json: bool,
}

impl DeleteWhereCommand {
    pub async fn execute(&self, framework: &CatalogFramework) -> Result<()> {
        let filter = self.filter.to_filter()?;
        if filter == Filter::Any && !self.all {
            bail!("refusing to delete every item without --all");
        }
        let request = DeleteByFilterRequest::new(filter).in_context(self.context.to_context()?);

        let timer = OperationTimer::new("delete-where", &common::LogContext::new());
        let result = framework.delete_by_filter(request).await;
        timer.finish_with_result(&result);
        let report = result?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!(
            "{} matched {}, deleted {} in {} batches ({} pages queried)",
            style("[delete]").cyan().bold(),
            report.matched,
            report.deleted,
            report.batches,
            report.pages_queried
        );
        for failure in &report.failed_batches {
            println!(
                "  {} batch {} ({} ids): {}",
                style("[!]").red(),
                failure.batch,
                failure.ids,
                failure.message
            );
        }
        for detail in &report.errors {
            println!("  {} {}: {}", style("[!]").yellow(), detail.source_id, detail.message);
        }
        Ok(())
    }
}
