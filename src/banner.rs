//! Startup banner and run summary display.

use std::path::Path;

use crate::consts::{AUTHOR, HOMEPAGE, REPO, format_number};
use crate::provider::Usage;

/// Configuration shown in the startup banner.
pub struct BannerInfo<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub auth_status: &'a str,
    pub database: &'a str,
    pub reports_dir: &'a Path,
    /// `None` for one-shot commands.
    pub address: Option<&'a str>,
}

/// Print the startup banner with service info.
pub fn print_banner(info: &BannerInfo) {
    println!(
        r#"
   ╔═══════════════════════════════════════╗
   ║         S L I D E W R I G H T         ║
   ║     topics in, slide decks out        ║
   ╚═══════════════════════════════════════╝

   version   {}
   by        {}
   home      {}
   repo      {}
   provider  {} ({})
   auth      {}
   database  {}
   reports   {}"#,
        env!("CARGO_PKG_VERSION"),
        AUTHOR,
        HOMEPAGE,
        REPO,
        info.provider,
        info.model,
        info.auth_status,
        info.database,
        info.reports_dir.display(),
    );
    if let Some(address) = info.address {
        println!("   listen    http://{}", address);
    }
    println!();
}

/// Print token usage after a generation run.
pub fn print_run_summary(usage: Usage, slides: usize) {
    if usage.total_tokens > 0 {
        println!(
            "run: {:>6} prompt + {:>6} completion = {:>6} tokens",
            format_number(usage.prompt_tokens),
            format_number(usage.completion_tokens),
            format_number(usage.total_tokens),
        );
    }
    println!("{} slides generated.", slides);
}
