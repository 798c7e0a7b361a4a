use super::ContextArgs;
use anyhow::{Context, Result};
use catalog_core::{ContentItem, CreateRequest, CreateResponse, Item};
use clap::Args;
use common::OperationTimer;
use console::style;
use federation::CatalogFramework;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct IngestCommand {
    /// JSON array of items to create
    #[arg(long, value_name = "FILE", required_unless_present = "attach")]
    pub items: Option<PathBuf>,

    /// Store this file as content alongside a new item
    #[arg(long, value_name = "FILE")]
    pub attach: Option<PathBuf>,

    /// MIME type of the attached file
    #[arg(long, default_value = "application/octet-stream", requires = "attach")]
    pub mime: String,

    /// Title for the item describing the attached file
    #[arg(long, requires = "attach")]
    pub title: Option<String>,

    #[command(flatten)]
    pub context: ContextArgs,

    #[arg(long)]
    pub json: bool,
}

impl IngestCommand {
    pub fn to_request(&self) -> Result<CreateRequest> {
        let items: Vec<Item> = match &self.items {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read items from {}", path.display()))?;
                serde_json::from_str(&text).with_context(|| format!("{} is not a JSON array of items", path.display()))?
            }
            None => Vec::new(),
        };

        let mut content = Vec::new();
        if let Some(path) = &self.attach {
            let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "content".to_string());
            let item = Item::new().with_title(self.title.clone().unwrap_or_else(|| filename.clone()));
            content.push(ContentItem::new(filename, self.mime.clone(), data, item));
        }

        Ok(CreateRequest {
            items,
            content,
            context: self.context.to_context()?,
        })
    }

    pub async fn execute(&self, framework: &CatalogFramework) -> Result<()> {
        let request = self.to_request()?;
        let timer = OperationTimer::new("create", &common::LogContext::new());
        let result = framework.create(request).await;
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

fn print_response(response: &CreateResponse) {
    println!("{} created {} items", style("[ingest]").cyan().bold(), response.created.len());
    for item in &response.created {
        println!(
            "  {}  {}  {}",
            item.id,
            item.title().unwrap_or("<untitled>"),
            style(item.source_id.as_deref().unwrap_or("?")).green()
        );
    }
    for detail in &response.processing_errors {
        println!("  {} {}: {}", style("[!]").yellow(), detail.source_id, detail.message);
    }
}
