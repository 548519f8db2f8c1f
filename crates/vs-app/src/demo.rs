//! Synthetic CVE listing used by the demo

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use vs_data::PageSource;

#[derive(Debug, Clone, PartialEq)]
pub struct CveRow {
    pub cve: String,
    pub severity: &'static str,
    pub images: u32,
}

const SEVERITIES: [&str; 4] = ["Critical", "Important", "Moderate", "Low"];

/// Fixed set of rows served page by page, with simulated latency.
///
/// Rows overlap between neighbouring pages the way an offset-based listing
/// does when new data arrives between requests.
pub struct DemoCveSource {
    total_rows: usize,
    page_size: usize,
    latency: Duration,
}

impl DemoCveSource {
    pub fn new(total_rows: usize, page_size: usize) -> Self {
        Self {
            total_rows,
            page_size,
            latency: Duration::from_millis(25),
        }
    }

    fn row(index: usize) -> CveRow {
        CveRow {
            cve: format!("CVE-2024-{:05}", 1000 + index),
            severity: SEVERITIES[index % SEVERITIES.len()],
            images: (index as u32 * 7) % 23 + 1,
        }
    }
}

#[async_trait]
impl PageSource<CveRow> for DemoCveSource {
    async fn fetch_page(&self, page_index: usize) -> Result<Vec<CveRow>> {
        tokio::time::sleep(self.latency).await;

        // Every page after the first repeats the previous page's last row
        let start = (page_index * self.page_size).saturating_sub(usize::from(page_index > 0));
        let end = (start + self.page_size).min(self.total_rows);
        Ok((start.min(end)..end).map(Self::row).collect())
    }
}
