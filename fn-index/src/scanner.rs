//! Line-based JavaScript function scanner
//!
//! Not a parser: each line is checked against a fixed list of declaration
//! shapes, and a comment within the three lines above becomes the description.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How many lines above a declaration are searched for a comment
const COMMENT_LOOKBACK: usize = 3;

/// Lines at least this long are never treated as stubs
const STUB_MAX_LEN: usize = 100;

const STUB_DESCRIPTION: &str = "Stub function";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    Function,
    Arrow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub name: String,
    /// 1-based line number
    pub line: usize,
    pub parameters: Vec<String>,
    #[serde(rename = "async")]
    pub is_async: bool,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: FunctionKind,
}

/// Output document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionIndex {
    pub total_functions: usize,
    pub file: String,
    pub functions: Vec<FunctionEntry>,
}

impl FunctionIndex {
    pub fn summary(&self) -> Summary {
        let async_count = self.functions.iter().filter(|f| f.is_async).count();
        let arrow = self
            .functions
            .iter()
            .filter(|f| f.kind == FunctionKind::Arrow)
            .count();

        Summary {
            total: self.functions.len(),
            async_count,
            arrow,
            regular: self.functions.len() - arrow,
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize index")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write index: {}", path.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub async_count: usize,
    pub arrow: usize,
    pub regular: usize,
}

struct DeclarationShape {
    regex: Regex,
    kind: FunctionKind,
    is_async: bool,
}

pub struct Scanner {
    shapes: Vec<DeclarationShape>,
}

impl Scanner {
    pub fn new() -> Result<Self> {
        // Group 1 is the name, group 2 the raw parameter list
        let table: [(&str, FunctionKind, bool); 6] = [
            // function name(params)
            (r"^\s*function\s+(\w+)\s*\((.*?)\)", FunctionKind::Function, false),
            // async function name(params)
            (r"^\s*async\s+function\s+(\w+)\s*\((.*?)\)", FunctionKind::Function, true),
            // const name = (params) =>
            (r"^\s*(?:const|let|var)\s+(\w+)\s*=\s*\((.*?)\)\s*=>", FunctionKind::Arrow, false),
            // const name = async (params) =>
            (r"^\s*(?:const|let|var)\s+(\w+)\s*=\s*async\s*\((.*?)\)\s*=>", FunctionKind::Arrow, true),
            // name: function(params)
            (r"^\s*(\w+)\s*:\s*function\s*\((.*?)\)", FunctionKind::Function, false),
            // name: async function(params)
            (r"^\s*(\w+)\s*:\s*async\s+function\s*\((.*?)\)", FunctionKind::Function, true),
        ];

        let shapes = table
            .into_iter()
            .map(|(pattern, kind, is_async)| {
                Ok(DeclarationShape {
                    regex: Regex::new(pattern)
                        .with_context(|| format!("Invalid declaration pattern: {}", pattern))?,
                    kind,
                    is_async,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { shapes })
    }

    pub fn scan_file(&self, path: &Path) -> Result<FunctionIndex> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let functions = self.scan_source(&source);

        Ok(FunctionIndex {
            total_functions: functions.len(),
            file: path.display().to_string(),
            functions,
        })
    }

    pub fn scan_source(&self, source: &str) -> Vec<FunctionEntry> {
        let lines: Vec<&str> = source.lines().collect();
        let mut functions = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            let Some((shape, captures)) = self
                .shapes
                .iter()
                .find_map(|s| s.regex.captures(line).map(|c| (s, c)))
            else {
                continue;
            };

            let mut description = preceding_comment(&lines, idx).unwrap_or_default();
            if description.is_empty() && is_stub(line) {
                description = STUB_DESCRIPTION.to_string();
            }

            functions.push(FunctionEntry {
                name: captures[1].to_string(),
                line: idx + 1,
                parameters: split_parameters(&captures[2]),
                is_async: shape.is_async,
                description,
                kind: shape.kind,
            });
        }

        functions
    }
}

/// Nearest comment among the lines just above `idx`
fn preceding_comment(lines: &[&str], idx: usize) -> Option<String> {
    (1..=COMMENT_LOOKBACK)
        .filter_map(|back| idx.checked_sub(back))
        .find_map(|i| {
            let prev = lines[i].trim();
            if prev.starts_with("//") {
                Some(prev.trim_start_matches('/').trim().to_string())
            } else if prev.starts_with("/*") || prev.contains("*/") {
                Some(
                    prev.replace("/*", "")
                        .replace("*/", "")
                        .replace('*', "")
                        .trim()
                        .to_string(),
                )
            } else {
                None
            }
        })
}

fn is_stub(line: &str) -> bool {
    line.contains("// Stub") || (line.contains("{}") && line.trim().chars().count() < STUB_MAX_LEN)
}

fn split_parameters(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
