//! Print Specification for fixed-layout output
//!
//! Page size, margins and background printing applied when a rendered
//! document is laid out by the headless browser.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperFormat {
    #[default]
    A4,
    A3,
    Letter,
    Legal,
}

impl PaperFormat {
    /// CSS `@page size` keyword.
    pub fn css_name(&self) -> &'static str {
        match self {
            Self::A4 => "A4",
            Self::A3 => "A3",
            Self::Letter => "letter",
            Self::Legal => "legal",
        }
    }
}

/// Margins in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Margins {
    pub fn uniform(mm: f64) -> Self {
        Self { top: mm, right: mm, bottom: mm, left: mm }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintSpec {
    pub format: PaperFormat,
    pub margins: Margins,
    pub print_background: bool,
}

impl Default for PrintSpec {
    fn default() -> Self {
        Self {
            format: PaperFormat::A4,
            margins: Margins::uniform(10.0),
            print_background: true,
        }
    }
}

impl PrintSpec {
    /// Create with validation
    pub fn new(format: PaperFormat, margins: Margins, print_background: bool) -> Result<Self, &'static str> {
        let spec = Self { format, margins, print_background };
        spec.check()?;
        Ok(spec)
    }

    pub fn check(&self) -> Result<(), &'static str> {
        let m = &self.margins;
        if [m.top, m.right, m.bottom, m.left]
            .iter()
            .any(|mm| !mm.is_finite() || *mm < 0.0 || *mm > 50.0)
        {
            return Err("Margins must be between 0 and 50 mm");
        }
        Ok(())
    }

    /// Stylesheet carrying the page configuration into the HTML intermediate.
    pub fn page_css(&self) -> String {
        let m = &self.margins;
        let mut css = format!(
            "@page {{ size: {}; margin: {}mm {}mm {}mm {}mm; }}\n",
            self.format.css_name(),
            m.top,
            m.right,
            m.bottom,
            m.left
        );
        if self.print_background {
            css.push_str("html, body { -webkit-print-color-adjust: exact; print-color-adjust: exact; }\n");
        }
        css
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_a4_with_10mm() {
        let css = PrintSpec::default().page_css();
        assert!(css.contains("size: A4; margin: 10mm 10mm 10mm 10mm;"));
        assert!(css.contains("print-color-adjust: exact"));
    }

    #[test]
    fn test_margin_bounds() {
        assert!(PrintSpec::new(PaperFormat::Letter, Margins::uniform(60.0), false).is_err());
        let spec = PrintSpec::new(PaperFormat::Letter, Margins::uniform(5.0), false).unwrap();
        assert!(!spec.page_css().contains("print-color-adjust"));
    }
}
