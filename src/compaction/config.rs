//! Compression threshold parsing.

use anyhow::{Context, Result};

/// When to start compressing, relative to the model's context window.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionThreshold {
    /// Percentage of the context window (e.g. 80%)
    Percentage(f32),
    /// Absolute token count
    Tokens(usize),
}

impl CompressionThreshold {
    /// Token count at which compression triggers for a given window.
    pub fn trigger_tokens(&self, context_window: usize) -> usize {
        match self {
            CompressionThreshold::Percentage(pct) => {
                ((context_window as f64) * (*pct as f64 / 100.0)).ceil() as usize
            }
            CompressionThreshold::Tokens(tokens) => (*tokens).min(context_window),
        }
    }

    /// Trigger point as a fraction of the window (0.0..=1.0).
    pub fn ratio(&self, context_window: usize) -> f64 {
        match self {
            CompressionThreshold::Percentage(pct) => *pct as f64 / 100.0,
            CompressionThreshold::Tokens(_) if context_window == 0 => 1.0,
            CompressionThreshold::Tokens(tokens) => {
                (*tokens as f64 / context_window as f64).min(1.0)
            }
        }
    }
}

impl Default for CompressionThreshold {
    fn default() -> Self {
        CompressionThreshold::Percentage(80.0)
    }
}

impl std::fmt::Display for CompressionThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionThreshold::Percentage(pct) => write!(f, "{}%", pct),
            CompressionThreshold::Tokens(tokens) => write!(f, "{}", tokens),
        }
    }
}

/// Parse a threshold string: `"80%"` or an absolute token count like `"100000"`.
pub fn parse_threshold(s: &str) -> Result<CompressionThreshold> {
    let s = s.trim();

    if s.is_empty() {
        anyhow::bail!("Compression threshold cannot be empty");
    }

    if let Some(num_str) = s.strip_suffix('%') {
        let pct: f32 = num_str
            .trim()
            .parse()
            .with_context(|| format!("Invalid percentage in compression threshold: {}", s))?;

        if pct <= 0.0 || pct > 100.0 {
            anyhow::bail!(
                "Compression threshold percentage must be between 0 and 100, got {}",
                pct
            );
        }

        Ok(CompressionThreshold::Percentage(pct))
    } else {
        let tokens: usize = s
            .parse()
            .with_context(|| format!("Invalid token count in compression threshold: {}", s))?;

        if tokens == 0 {
            anyhow::bail!("Compression threshold cannot be zero");
        }

        Ok(CompressionThreshold::Tokens(tokens))
    }
}
