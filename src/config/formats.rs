use std::collections::HashSet;

/// One resolution variant produced for every uploaded video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFormat {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

impl TargetFormat {
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
        }
    }

    /// `W:H`, as consumed by the encoder's scale filter.
    pub fn geometry(&self) -> String {
        format!("{}:{}", self.width, self.height)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("format table is empty")]
    Empty,
    #[error("format entry {0:?} is not of the form label=W:H")]
    Malformed(String),
    #[error("format label must not be empty")]
    EmptyLabel,
    #[error("duplicate format label {0:?}")]
    DuplicateLabel(String),
    #[error("format {0:?} needs a positive width and height")]
    InvalidGeometry(String),
}

/// Ordered set of target formats, fixed for the lifetime of a deployment.
///
/// The same table must be used by the worker and by anything reading
/// `variant_outputs` keys back out of the job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatTable {
    formats: Vec<TargetFormat>,
}

impl Default for FormatTable {
    fn default() -> Self {
        Self {
            formats: vec![
                TargetFormat::new("144p", 256, 144),
                TargetFormat::new("240p", 426, 240),
                TargetFormat::new("360p", 640, 360),
                TargetFormat::new("480p", 854, 480),
                TargetFormat::new("720p", 1280, 720),
                TargetFormat::new("1080p", 1920, 1080),
            ],
        }
    }
}

impl FormatTable {
    pub fn new(formats: Vec<TargetFormat>) -> Result<Self, FormatError> {
        if formats.is_empty() {
            return Err(FormatError::Empty);
        }

        let mut seen = HashSet::new();
        for format in &formats {
            if format.label.trim().is_empty() {
                return Err(FormatError::EmptyLabel);
            }
            if format.width == 0 || format.height == 0 {
                return Err(FormatError::InvalidGeometry(format.label.clone()));
            }
            if !seen.insert(format.label.as_str()) {
                return Err(FormatError::DuplicateLabel(format.label.clone()));
            }
        }

        Ok(Self { formats })
    }

    /// Parses `144p=256:144,360p=640:360`. Order is preserved.
    pub fn parse(raw: &str) -> Result<Self, FormatError> {
        let mut formats = Vec::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (label, geometry) = entry
                .split_once('=')
                .ok_or_else(|| FormatError::Malformed(entry.to_string()))?;
            let (width, height) = geometry
                .split_once(':')
                .ok_or_else(|| FormatError::Malformed(entry.to_string()))?;
            let width = width
                .trim()
                .parse::<u32>()
                .map_err(|_| FormatError::Malformed(entry.to_string()))?;
            let height = height
                .trim()
                .parse::<u32>()
                .map_err(|_| FormatError::Malformed(entry.to_string()))?;

            formats.push(TargetFormat::new(label.trim(), width, height));
        }

        Self::new(formats)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetFormat> {
        self.formats.iter()
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.formats.iter().map(|f| f.label.as_str()).collect()
    }
}
