//! Negotiated display output description.

/// How the streamed display relates to the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Stream a copy of the local display.
    Mirror,
    /// Stream a virtual display sized for the sink.
    Extend,
}

/// Resolution and refresh rate the capture producer is set up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayOutput {
    pub mode: DisplayMode,
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
}

impl DisplayOutput {
    pub fn new(mode: DisplayMode, width: u32, height: u32, refresh_rate: u32) -> Self {
        Self {
            mode,
            width,
            height,
            refresh_rate,
        }
    }
}

impl std::fmt::Display for DisplayOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.mode {
            DisplayMode::Mirror => "mirror",
            DisplayMode::Extend => "extend",
        };
        write!(
            f,
            "{}x{}@{} ({})",
            self.width, self.height, self.refresh_rate, mode
        )
    }
}
