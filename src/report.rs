//! Minimal PDF 1.4 writer for the carbon export.
//!
//! Produces text-only documents in Helvetica on US Letter pages, paginating
//! automatically. Characters outside printable ASCII are replaced with `?`.

use crate::models::{CarbonEntry, User};

const PAGE_WIDTH: f64 = 612.0;
const PAGE_HEIGHT: f64 = 792.0;
const MARGIN: f64 = 72.0;

/// Maximum number of entries listed in a carbon report.
pub const REPORT_ENTRY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Style {
    Title,
    Heading,
    Body,
}

impl Style {
    fn size(self) -> f64 {
        match self {
            Style::Title => 20.0,
            Style::Heading => 14.0,
            Style::Body => 11.0,
        }
    }

    fn font(self) -> &'static str {
        match self {
            Style::Body => "/F1",
            Style::Title | Style::Heading => "/F2",
        }
    }
}

#[derive(Debug, Clone)]
enum Block {
    Text(Style, String),
    Space(f64),
}

#[derive(Debug, Default)]
pub struct PdfDocument {
    blocks: Vec<Block>,
}

impl PdfDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(&mut self, text: impl Into<String>) -> &mut Self {
        self.blocks.push(Block::Text(Style::Title, text.into()));
        self
    }

    pub fn heading(&mut self, text: impl Into<String>) -> &mut Self {
        self.blocks.push(Block::Text(Style::Heading, text.into()));
        self
    }

    pub fn paragraph(&mut self, text: impl Into<String>) -> &mut Self {
        self.blocks.push(Block::Text(Style::Body, text.into()));
        self
    }

    pub fn space(&mut self, points: f64) -> &mut Self {
        self.blocks.push(Block::Space(points));
        self
    }

    /// Lay blocks out into per-page content streams.
    fn paginate(&self) -> Vec<String> {
        let mut pages = Vec::new();
        let mut current = String::new();
        let mut y = PAGE_HEIGHT - MARGIN;

        for block in &self.blocks {
            let (advance, draw) = match block {
                Block::Space(points) => (*points, None),
                Block::Text(style, text) => (style.size() * 1.4, Some((*style, text))),
            };
            if y - advance < MARGIN && !current.is_empty() {
                pages.push(std::mem::take(&mut current));
                y = PAGE_HEIGHT - MARGIN;
            }
            y -= advance;
            if let Some((style, text)) = draw {
                current.push_str(&format!(
                    "BT {} {:.0} Tf 1 0 0 1 {:.2} {:.2} Tm ({}) Tj ET\n",
                    style.font(),
                    style.size(),
                    MARGIN,
                    y,
                    escape(text)
                ));
            }
        }
        if !current.is_empty() || pages.is_empty() {
            pages.push(current);
        }
        pages
    }

    /// Serialize to PDF bytes with a correct cross-reference table.
    pub fn render(&self) -> Vec<u8> {
        let pages = self.paginate();
        // 1 catalog, 2 pages, 3-4 fonts, then (page, content) pairs.
        let first_page_obj = 5;
        let page_ids: Vec<usize> = (0..pages.len()).map(|i| first_page_obj + i * 2).collect();

        let mut objects: Vec<String> = Vec::with_capacity(4 + pages.len() * 2);
        objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
        let kids: Vec<String> = page_ids.iter().map(|id| format!("{} 0 R", id)).collect();
        objects.push(format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        ));
        objects.push(
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_string(),
        );
        objects.push(
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
                .to_string(),
        );
        for (page_id, content) in page_ids.iter().zip(&pages) {
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.0} {:.0}] \
                 /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
                PAGE_WIDTH,
                PAGE_HEIGHT,
                page_id + 1
            ));
            objects.push(format!(
                "<< /Length {} >>\nstream\n{}endstream",
                content.len(),
                content
            ));
        }

        let mut out = String::from("%PDF-1.4\n");
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
        }
        let xref_offset = out.len();
        out.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
        out.push_str("0000000000 65535 f \n");
        for offset in offsets {
            out.push_str(&format!("{:010} 00000 n \n", offset));
        }
        out.push_str(&format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        ));
        out.into_bytes()
    }
}

/// Escape a string literal and force it into printable ASCII.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            ' '..='~' => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

/// Build the carbon footprint report. `entries` are expected newest first;
/// totals cover all of them, the listing only the first fifty.
pub fn carbon_report(user: &User, entries: &[CarbonEntry], start_date: &str, end_date: &str) -> Vec<u8> {
    let total_co2: f64 = entries.iter().map(|e| e.co2_calculated).sum();

    let mut doc = PdfDocument::new();
    doc.title("EcoSphere Carbon Footprint Report")
        .space(12.0)
        .paragraph(format!("User: {}", user.username))
        .paragraph(format!("Report Period: {} to {}", start_date, end_date))
        .space(12.0)
        .heading(format!("Total CO2 Emissions: {:.2} kg", total_co2))
        .paragraph(format!("Total Entries: {}", entries.len()))
        .space(12.0);

    if !entries.is_empty() {
        doc.heading("Carbon Entries:").space(6.0);
        for entry in entries.iter().take(REPORT_ENTRY_LIMIT) {
            doc.paragraph(format!(
                "{} - {}: {} {} ({:.2} kg CO2)",
                entry.date, entry.subcategory, entry.value, entry.unit, entry.co2_calculated
            ))
            .space(3.0);
        }
    }
    doc.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CarbonCategory, Subcategory, UserRole};

    fn user() -> User {
        User {
            id: 1,
            username: "reporter".into(),
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            role: UserRole::Individual,
            location: String::new(),
            bio: String::new(),
            avatar: None,
            notifications_enabled: true,
            email_notifications: true,
            total_points: 0,
            login_streak: 0,
            last_login_date: None,
            is_active: true,
            date_joined: "2024-01-01 00:00:00".into(),
        }
    }

    fn entry(id: i64) -> CarbonEntry {
        CarbonEntry {
            id,
            user_id: 1,
            category: CarbonCategory::Transportation,
            subcategory: Subcategory::Car,
            value: 10.0,
            unit: "km".into(),
            co2_calculated: 2.0,
            date: "2024-03-01".into(),
            notes: String::new(),
            created_at: "2024-03-01 10:00:00".into(),
            updated_at: "2024-03-01 10:00:00".into(),
        }
    }

    fn as_text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(r"a(b)c\d"), r"a\(b\)c\\d");
        assert_eq!(escape("CO₂ 5°"), "CO? 5?");
    }

    #[test]
    fn test_empty_document_has_one_page() {
        let pdf = as_text(&PdfDocument::new().render());
        assert!(pdf.starts_with("%PDF-1.4"));
        assert!(pdf.contains("/Count 1"));
        assert!(pdf.trim_end().ends_with("%%EOF"));
    }

    #[test]
    fn test_xref_offsets_point_at_objects() {
        let mut doc = PdfDocument::new();
        doc.title("Hello").paragraph("World");
        let pdf = as_text(&doc.render());

        let startxref: usize = pdf
            .rsplit("startxref\n")
            .next()
            .unwrap()
            .lines()
            .next()
            .unwrap()
            .parse()
            .unwrap();
        assert!(pdf[startxref..].starts_with("xref\n"));

        let entries: Vec<&str> = pdf[startxref..]
            .lines()
            .skip(3)
            .take_while(|l| l.ends_with(" n "))
            .collect();
        assert_eq!(entries.len(), 6);
        for (i, line) in entries.iter().enumerate() {
            let offset: usize = line[..10].parse().unwrap();
            assert!(pdf[offset..].starts_with(&format!("{} 0 obj", i + 1)));
        }
    }

    #[test]
    fn test_long_document_paginates() {
        let mut doc = PdfDocument::new();
        for i in 0..200 {
            doc.paragraph(format!("line {}", i));
        }
        let pdf = as_text(&doc.render());
        let pages = pdf.matches("/Type /Page ").count();
        assert!(pages > 1);
        assert!(pdf.contains(&format!("/Count {}", pages)));
    }

    #[test]
    fn test_stream_length_matches() {
        let mut doc = PdfDocument::new();
        doc.paragraph("abc");
        let pdf = as_text(&doc.render());
        let idx = pdf.find("/Length ").unwrap();
        let len: usize = pdf[idx + 8..].split(' ').next().unwrap().parse().unwrap();
        let body_start = pdf[idx..].find("stream\n").unwrap() + idx + 7;
        assert!(pdf[body_start + len..].starts_with("endstream"));
    }

    #[test]
    fn test_carbon_report_lists_at_most_fifty() {
        let entries: Vec<CarbonEntry> = (1..=60).map(entry).collect();
        let pdf = as_text(&carbon_report(&user(), &entries, "2024-01-01", "2024-12-31"));
        assert!(pdf.starts_with("%PDF-"));
        assert!(pdf.contains("User: reporter"));
        assert!(pdf.contains("Total CO2 Emissions: 120.00 kg"));
        assert!(pdf.contains("Total Entries: 60"));
        assert_eq!(pdf.matches("CAR: 10 km").count(), 50);
    }
}
