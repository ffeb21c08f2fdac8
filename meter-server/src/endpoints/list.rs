use std::fmt::Write;

use axum::extract::State;
use axum::response::{Html, IntoResponse};

use crate::endpoints::common::ApiError;
use crate::service::ServiceState;

/// `GET /`
///
/// Renders all metrics as an HTML table, sorted by name.
pub async fn handle(State(state): State<ServiceState>) -> Result<impl IntoResponse, ApiError> {
    let mut samples = state.metrics().get_all().await?;
    samples.sort_by(|a, b| a.name().cmp(b.name()));

    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>Metrics</title></head>\n<body>\n<table>\n\
         <tr><th>Name</th><th>Type</th><th>Value</th></tr>\n",
    );

    for sample in &samples {
        writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            Escaped(sample.name()),
            sample.kind(),
            sample.value()
        )
        .ok();
    }

    html.push_str("</table>\n</body>\n</html>\n");
    Ok(Html(html))
}

struct Escaped<'a>(&'a str);

impl std::fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            match c {
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '&' => f.write_str("&amp;")?,
                '"' => f.write_str("&quot;")?,
                '\'' => f.write_str("&#39;")?,
                c => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        let escaped = Escaped("<b>\"a\" & 'b'</b>").to_string();
        assert_eq!(escaped, "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;");
    }
}
