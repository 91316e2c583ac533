//! Markdown rendering and file management for research reports.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

use super::{ResearchReport, ResearchStep};

/// Characters that are illegal in file names on at least one platform.
const ILLEGAL_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_FILENAME_CHARS: usize = 50;
const MAX_SOURCES_PER_STEP: usize = 3;
const PREVIEW_CHARS: usize = 150;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A report file found on disk.
#[derive(Debug, Clone, Serialize)]
pub struct SavedReport {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub created: DateTime<Local>,
    pub modified: DateTime<Local>,
}

/// Section headings and fixed phrases for one output language.
struct Labels {
    title_suffix: &'static str,
    info: &'static str,
    topic: &'static str,
    language: &'static str,
    generated_at: &'static str,
    date_format: &'static str,
    duration: &'static str,
    seconds: &'static str,
    steps: &'static str,
    sources_count: &'static str,
    count_unit: &'static str,
    summary: &'static str,
    key_findings: &'static str,
    recommendations: &'static str,
    main_sources: &'static str,
    untitled: &'static str,
    incomplete: &'static str,
    error: &'static str,
    references: &'static str,
    footer: &'static str,
    footer_time: &'static str,
}

const ZH: Labels = Labels {
    title_suffix: "深度研究报告",
    info: "📊 报告信息",
    topic: "研究主题",
    language: "报告语言",
    generated_at: "生成时间",
    date_format: "%Y年%m月%d日 %H:%M:%S",
    duration: "研究耗时",
    seconds: " 秒",
    steps: "研究步骤",
    sources_count: "信息来源",
    count_unit: " 个",
    summary: "📋 摘要",
    key_findings: "🔍 关键发现",
    recommendations: "💡 建议与推荐",
    main_sources: "主要信息来源",
    untitled: "未知标题",
    incomplete: "**研究状态**: ❌ 未完成",
    error: "错误信息",
    references: "📚 参考来源",
    footer: "本报告由 Slidewright 深度研究系统自动生成",
    footer_time: "生成时间",
};

const EN: Labels = Labels {
    title_suffix: "Research Report",
    info: "📊 Report Information",
    topic: "Topic",
    language: "Language",
    generated_at: "Generated",
    date_format: "%Y-%m-%d %H:%M:%S",
    duration: "Duration",
    seconds: " seconds",
    steps: "Research Steps",
    sources_count: "Sources",
    count_unit: "",
    summary: "📋 Executive Summary",
    key_findings: "🔍 Key Findings",
    recommendations: "💡 Recommendations",
    main_sources: "Main Sources",
    untitled: "Untitled",
    incomplete: "**Status**: ❌ Incomplete",
    error: "Error",
    references: "📚 References",
    footer: "Generated automatically by the Slidewright research system",
    footer_time: "Generated at",
};

fn labels_for(language: &str) -> &'static Labels {
    if language.to_ascii_lowercase().starts_with("zh") {
        &ZH
    } else {
        &EN
    }
}

/// Renders research reports to Markdown and manages the saved files.
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    reports_dir: PathBuf,
}

impl ReportGenerator {
    /// The directory is created lazily on the first save.
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        let dir = reports_dir.into();
        let reports_dir = std::path::absolute(&dir).unwrap_or(dir);
        Self { reports_dir }
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Render a report as Markdown. Output depends only on the report, so
    /// rendering the same report twice yields the same bytes.
    pub fn render(&self, report: &ResearchReport) -> String {
        let l = labels_for(&report.language);
        let mut out: Vec<String> = Vec::new();

        out.push(format!("# {} - {}", report.topic, l.title_suffix));
        out.push(String::new());
        out.push("---".to_string());
        out.push(String::new());

        out.push(format!("## {}", l.info));
        out.push(String::new());
        out.push(format!("- **{}**: {}", l.topic, report.topic));
        out.push(format!("- **{}**: {}", l.language, report.language));
        out.push(format!(
            "- **{}**: {}",
            l.generated_at,
            report.created_at.format(l.date_format)
        ));
        out.push(format!(
            "- **{}**: {:.2}{}",
            l.duration, report.total_duration, l.seconds
        ));
        out.push(format!(
            "- **{}**: {}{}",
            l.steps,
            report.steps.len(),
            l.count_unit
        ));
        out.push(format!(
            "- **{}**: {}{}",
            l.sources_count,
            report.sources.len(),
            l.count_unit
        ));
        out.push(String::new());

        out.push(format!("## {}", l.summary));
        out.push(String::new());
        out.push(report.executive_summary.clone());
        out.push(String::new());

        push_numbered_section(&mut out, l.key_findings, &report.key_findings);
        push_numbered_section(&mut out, l.recommendations, &report.recommendations);

        for step in &report.steps {
            push_step(&mut out, l, step);
        }

        push_numbered_section(&mut out, l.references, &report.sources);

        out.push("---".to_string());
        out.push(String::new());
        out.push(format!("*{}*", l.footer));
        out.push(String::new());
        out.push(format!(
            "*{}: {}*",
            l.footer_time,
            report.created_at.format("%Y-%m-%d %H:%M:%S")
        ));

        out.join("\n")
    }

    /// Write the rendered report to the reports directory.
    ///
    /// Without a custom name the file is called
    /// `research_<safe_topic>_<YYYYMMDD_HHMMSS>.md`. Failures are logged
    /// and returned.
    pub fn save(
        &self,
        report: &ResearchReport,
        filename: Option<&str>,
    ) -> Result<PathBuf, ReportError> {
        let filename = match filename {
            Some(name) => custom_filename(name),
            None => default_filename(report),
        };
        let path = self.reports_dir.join(filename);
        let content = self.render(report);

        if let Err(source) = write_file(&self.reports_dir, &path, &content) {
            log::error!(
                "failed to save research report '{}' to {}: {}",
                report.topic,
                path.display(),
                source
            );
            return Err(ReportError::Write { path, source });
        }

        log::info!("research report saved to {}", path.display());
        Ok(path)
    }

    /// Saved `*.md` reports, newest first. I/O problems are logged and
    /// yield an empty list.
    pub fn list_saved(&self) -> Vec<SavedReport> {
        match self.scan() {
            Ok(reports) => reports,
            Err(e) => {
                log::error!(
                    "failed to list research reports in {}: {}",
                    self.reports_dir.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Delete a saved report by file name. Returns `false` (never errors)
    /// for names that are missing, not `.md`, or not a plain file name.
    pub fn delete(&self, filename: &str) -> bool {
        let name = Path::new(filename);
        if !is_plain_file_name(name) || !is_markdown(name) {
            log::warn!("refusing to delete report '{}'", filename);
            return false;
        }

        let path = self.reports_dir.join(name);
        if !path.is_file() {
            log::warn!("report file not found: {}", filename);
            return false;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("deleted research report: {}", filename);
                true
            }
            Err(e) => {
                log::error!("failed to delete report {}: {}", filename, e);
                false
            }
        }
    }

    fn scan(&self) -> io::Result<Vec<SavedReport>> {
        if !self.reports_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut reports = Vec::new();
        for entry in fs::read_dir(&self.reports_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !is_markdown(&path) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified()?;
            // not every filesystem records a birth time
            let created = meta.created().unwrap_or(modified);
            reports.push(SavedReport {
                filename: entry.file_name().to_string_lossy().into_owned(),
                path,
                size: meta.len(),
                created: created.into(),
                modified: modified.into(),
            });
        }

        reports.sort_by(|a, b| {
            b.created
                .cmp(&a.created)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(reports)
    }
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::new(crate::consts::DEFAULT_REPORTS_DIR)
    }
}

/// Make a string safe to use as (part of) a file name: illegal characters
/// become `_`, whitespace runs become a single `_`, and the result is cut
/// to 50 characters.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if ILLEGAL_FILENAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join("_");
    collapsed.chars().take(MAX_FILENAME_CHARS).collect()
}

fn default_filename(report: &ResearchReport) -> String {
    let safe_topic = sanitize_filename(&report.topic);
    let safe_topic = if safe_topic.is_empty() {
        "untitled".to_string()
    } else {
        safe_topic
    };
    format!(
        "research_{}_{}.md",
        safe_topic,
        report.created_at.format("%Y%m%d_%H%M%S")
    )
}

fn custom_filename(name: &str) -> String {
    let stem = name.strip_suffix(".md").unwrap_or(name);
    let stem = sanitize_filename(stem);
    if stem.is_empty() {
        "report.md".to_string()
    } else {
        format!("{stem}.md")
    }
}

fn write_file(dir: &Path, path: &Path, content: &str) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(path, content)
}

fn push_numbered_section(out: &mut Vec<String>, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push(format!("## {heading}"));
    out.push(String::new());
    for (i, item) in items.iter().enumerate() {
        out.push(format!("{}. {}", i + 1, item));
    }
    out.push(String::new());
}

fn push_step(out: &mut Vec<String>, l: &Labels, step: &ResearchStep) {
    if !step.completed {
        out.push(l.incomplete.to_string());
        out.push(String::new());
        out.push(format!("**{}**: {}", l.error, step.analysis));
        out.push(String::new());
        return;
    }

    out.push(step.analysis.clone());
    out.push(String::new());

    if step.results.is_empty() {
        return;
    }

    out.push(format!("**{}**:", l.main_sources));
    out.push(String::new());
    for (i, result) in step.results.iter().take(MAX_SOURCES_PER_STEP).enumerate() {
        out.push(format!(
            "{}. [{}]({})",
            i + 1,
            result.title.as_deref().unwrap_or(l.untitled),
            result.url.as_deref().unwrap_or("#")
        ));
        if let Some(content) = result.content.as_deref().filter(|c| !c.is_empty()) {
            out.push(format!("   > {}", preview(content)));
        }
    }
    out.push(String::new());
}

/// The first 150 characters of the raw content, with `...` when cut,
/// then put on one line so it stays inside the `>` quote.
fn preview(content: &str) -> String {
    let mut head: String = content.chars().take(PREVIEW_CHARS).collect();
    if content.chars().nth(PREVIEW_CHARS).is_some() {
        head.push_str("...");
    }
    head.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_markdown(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "md")
}

fn is_plain_file_name(path: &Path) -> bool {
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
