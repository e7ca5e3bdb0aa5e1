//! Minimal HTML table output, so views can be dropped into a page or notebook.
use std::{borrow::Cow, fmt, fmt::Write};

/// Accumulates an escaped HTML table.
pub struct HtmlTable {
    title: Option<Cow<'static, str>>,
    output: String,
    scratch: String,
    col_count: usize,
}

impl HtmlTable {
    pub fn new(headers: impl IntoIterator<Item = impl fmt::Display>) -> Self {
        let mut this = HtmlTable {
            title: None,
            output: String::from("<table><thead><tr>"),
            scratch: String::new(),
            col_count: 0,
        };
        for header in headers {
            this.output.push_str("<th>");
            this.escaped(header);
            this.output.push_str("</th>");
            this.col_count += 1;
        }
        this.output.push_str("</tr></thead><tbody>");
        this
    }

    pub fn with_title(mut self, title: impl Into<Cow<'static, str>>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Add a row. Short rows are padded with empty cells.
    ///
    /// `class` is put on the `<tr>`, and must not need escaping.
    pub fn row(&mut self, class: Option<&str>, cells: impl IntoIterator<Item = impl fmt::Display>) {
        match class {
            Some(class) => {
                let _ = write!(self.output, r#"<tr class="{}">"#, class);
            }
            None => self.output.push_str("<tr>"),
        }
        let mut written = 0;
        for cell in cells {
            self.output.push_str("<td>");
            self.escaped(cell);
            self.output.push_str("</td>");
            written += 1;
        }
        for _ in written..self.col_count {
            self.output.push_str("<td></td>");
        }
        self.output.push_str("</tr>");
    }

    pub fn finish(mut self) -> String {
        self.output.push_str("</tbody></table>");
        match self.title {
            Some(title) => {
                let mut out = String::from("<h3>");
                html_escape::encode_text_to_string(&title, &mut out);
                out.push_str("</h3>");
                out.push_str(&self.output);
                out
            }
            None => self.output,
        }
    }

    fn escaped(&mut self, content: impl fmt::Display) {
        self.scratch.clear();
        let _ = write!(self.scratch, "{}", content);
        html_escape::encode_text_to_string(&self.scratch, &mut self.output);
    }
}
