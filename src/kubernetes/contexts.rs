// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Resolve `--context` arguments against kubeconfig contexts
//!
//! An argument is a comma-separated list of exact names or glob patterns
//! (`*` and `?`). Order of first appearance is kept and duplicates dropped.

use anyhow::{Result, bail};

/// Expand a context argument into the kubeconfig contexts it names
pub fn resolve_contexts(spec: &str, available: &[String]) -> Result<Vec<String>> {
    let mut resolved: Vec<String> = Vec::new();

    for pattern in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let is_glob = pattern.contains(['*', '?']);
        if !is_glob && !available.iter().any(|c| c == pattern) {
            bail!("Context '{}' not found in kubeconfig", pattern);
        }

        for ctx in available.iter().filter(|c| glob_match(pattern, c)) {
            if !resolved.contains(ctx) {
                resolved.push(ctx.clone());
            }
        }
    }

    if resolved.is_empty() {
        bail!("No contexts matched '{}'", spec);
    }
    Ok(resolved)
}

/// Glob match with `*` (any run) and `?` (one character)
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Last star position in the pattern and the text index it resumed from
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, resume)) => {
                    p = star + 1;
                    t = resume + 1;
                    backtrack = Some((star, resume + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
