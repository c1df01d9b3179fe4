//! DTE engine configuration.

use serde::Deserialize;

/// Configuration of the DTE engine.
#[derive(Debug, Clone, Deserialize)]
pub struct DteConfig {
    /// Capacity of the line/frame reassembly buffer in bytes.
    #[serde(default = "default_line_buffer_size")]
    pub line_buffer_size: usize,
    /// Depth of the pattern-detection position queue.
    #[serde(default = "default_pattern_queue_size")]
    pub pattern_queue_size: usize,
    /// Capacity of the published event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Whether the link is to be multiplexed once set up.
    #[serde(default = "default_cmux")]
    pub cmux: bool,
    /// Commands routed over the data channel (DLCI 1) so that the CONNECT
    /// response arrives there instead of the AT channel.
    #[serde(default = "default_dial_commands")]
    pub dial_commands: Vec<String>,
}

fn default_line_buffer_size() -> usize {
    16 * 1024
}

fn default_pattern_queue_size() -> usize {
    16
}

fn default_event_capacity() -> usize {
    16
}

fn default_cmux() -> bool {
    true
}

fn default_dial_commands() -> Vec<String> {
    vec!["ATD*99***1#\r".to_owned()]
}

impl Default for DteConfig {
    fn default() -> Self {
        Self {
            line_buffer_size: default_line_buffer_size(),
            pattern_queue_size: default_pattern_queue_size(),
            event_capacity: default_event_capacity(),
            cmux: default_cmux(),
            dial_commands: default_dial_commands(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_a_plain_lte_module() {
        let config = DteConfig::default();
        assert_eq!(config.line_buffer_size, 16 * 1024);
        assert_eq!(config.pattern_queue_size, 16);
        assert!(config.cmux);
        assert_eq!(config.dial_commands, ["ATD*99***1#\r"]);
    }
}
