use super::ContextArgs;
use anyhow::Result;
use catalog_core::{SourceInfoRequest, SourceInfoResponse};
use clap::Args;
use common::OperationTimer;
use console::style;
use federation::CatalogFramework;

#[derive(Debug, Args)]
pub struct SourceInfoCommand {
    /// Sources to describe besides the framework itself
    pub ids: Vec<String>,

    /// Describe every federated source
    #[arg(short, long, conflicts_with = "ids")]
    pub enterprise: bool,

    #[command(flatten)]
    pub context: ContextArgs,

    #[arg(long)]
    pub json: bool,
}

impl SourceInfoCommand {
    pub async fn execute(&self, framework: &CatalogFramework) -> Result<()> {
        let mut request = if self.enterprise {
            SourceInfoRequest::enterprise()
        } else {
            SourceInfoRequest::of(self.ids.iter().cloned())
        };
        request.context = self.context.to_context()?;

        let timer = OperationTimer::new("source-info", &common::LogContext::new());
        let result = framework.get_source_info(request).await;
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

fn print_response(response: &SourceInfoResponse) {
    println!("{} {} sources", style("[sources]").cyan().bold(), response.descriptors.len());
    for descriptor in &response.descriptors {
        let status = if descriptor.available {
            style("available").green()
        } else {
            style("unavailable").red()
        };
        let capabilities: Vec<String> = descriptor.capabilities.iter().map(|c| format!("{c:?}")).collect();
        println!(
            "  {:<16} v{:<8} {:<12} [{}]",
            descriptor.id,
            descriptor.version,
            status,
            capabilities.join(", ")
        );
    }
}
