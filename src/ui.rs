use crate::aggregate::{DenseSeries, SeriesMode};
use crate::crm::{OpportunityFields, Record};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

/// Line style for one chart series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStyle {
    pub stroke: &'static str,
    #[serde(rename = "stroke-width")]
    pub stroke_width: u8,
    pub opacity: f32,
}

const fn style(stroke: &'static str) -> SeriesStyle {
    SeriesStyle {
        stroke,
        stroke_width: 3,
        opacity: 0.8,
    }
}

/// Authors are styled by their index in the sorted author list. Authors past the
/// end of the palette are left out of the chart.
pub const PALETTE: [SeriesStyle; 13] = [
    style("#ff9900"),
    style("#666633"),
    style("#cccc99"),
    style("#5b7c99"),
    style("#990033"),
    style("#92cd00"),
    style("#ffcf79"),
    style("#a8a79a"),
    style("#2c6700"),
    style("#6600cc"),
    style("#ffcc00"),
    style("#000000"),
    style("#cc0000"),
];

pub const HOVER_STROKE_WIDTH: u8 = 4;

#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub label: String,
    pub values: Vec<u64>,
    pub style: SeriesStyle,
    #[serde(rename = "hover-stroke-width")]
    pub hover_stroke_width: u8,
}

/// Everything the dashboard script needs to draw the chart.
#[derive(Debug, Clone, Serialize)]
pub struct ChartPayload {
    pub mode: SeriesMode,
    pub window: String,
    pub dates: Vec<NaiveDate>,
    pub totals: Vec<u64>,
    pub authors: Vec<String>,
    pub series: Vec<ChartSeries>,
    pub total_edits: u64,
    /// Authors that did not get a palette entry.
    pub unstyled_authors: Vec<String>,
}

impl ChartPayload {
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

pub fn build_chart(series: Option<&DenseSeries>, mode: SeriesMode, window: &str) -> ChartPayload {
    let Some(series) = series else {
        return ChartPayload {
            mode,
            window: window.to_string(),
            dates: Vec::new(),
            totals: Vec::new(),
            authors: Vec::new(),
            series: Vec::new(),
            total_edits: 0,
            unstyled_authors: Vec::new(),
        };
    };

    let dates = series.points.iter().map(|point| point.date).collect();
    let totals: Vec<u64> = series.points.iter().map(|point| point.total).collect();

    let lines = match series.mode {
        SeriesMode::Total => vec![ChartSeries {
            label: "All authors".to_string(),
            values: totals.clone(),
            style: PALETTE[0],
            hover_stroke_width: HOVER_STROKE_WIDTH,
        }],
        SeriesMode::PerAuthor => series
            .authors
            .iter()
            .zip(PALETTE.iter())
            .enumerate()
            .map(|(idx, (author, style))| ChartSeries {
                label: author.clone(),
                values: series.points.iter().map(|point| point.by_author[idx]).collect(),
                style: *style,
                hover_stroke_width: HOVER_STROKE_WIDTH,
            })
            .collect(),
    };

    let unstyled_authors = match series.mode {
        SeriesMode::Total => Vec::new(),
        SeriesMode::PerAuthor => series.authors.iter().skip(PALETTE.len()).cloned().collect(),
    };

    ChartPayload {
        mode: series.mode,
        window: window.to_string(),
        dates,
        total_edits: series.total_edits(),
        totals,
        authors: series.authors.clone(),
        series: lines,
        unstyled_authors,
    }
}

pub fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Substitutes `{{KEY}}` markers in a single pass. Inserted values are never
/// rescanned, so text coming from the CRM cannot expand another marker.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let value = after.find("}}").and_then(|end| {
            let key = &after[..end];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (end, *value))
        });
        match value {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn page(title: &str, body: &str) -> String {
    fill(PAGE_HTML, &[("TITLE", escape_html(title).as_str()), ("BODY", body)])
}

pub fn render_dashboard(chart: &ChartPayload) -> String {
    // no raw '<' in the payload, so nothing in it can close the script element
    let data = serde_json::to_string(chart)
        .unwrap_or_else(|_| "null".to_string())
        .replace('<', "\\u003c");

    let (first, last) = match (chart.dates.first(), chart.dates.last()) {
        (Some(first), Some(last)) => (first.to_string(), last.to_string()),
        _ => ("-".to_string(), "-".to_string()),
    };

    let notice = if chart.unstyled_authors.is_empty() {
        String::new()
    } else {
        format!(
            r#"<p class="hint">Not charted (palette exhausted): {}</p>"#,
            escape_html(&chart.unstyled_authors.join(", "))
        )
    };

    let body = fill(
        DASHBOARD_HTML,
        &[
            ("WINDOW", escape_html(&chart.window).as_str()),
            ("TOTAL", chart.total_edits.to_string().as_str()),
            ("AUTHORS", chart.authors.len().to_string().as_str()),
            ("FIRST", first.as_str()),
            ("LAST", last.as_str()),
            ("NOTICE", notice.as_str()),
            ("DATA", data.as_str()),
        ],
    );
    page("Opportunity Edits", &body)
}

pub fn render_detail(record: &Record) -> String {
    let id = record.get("Id").and_then(Value::as_str).unwrap_or_default();
    let mut rows = String::new();
    for (key, value) in record {
        if key == "attributes" {
            continue;
        }
        let text = match value {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        rows.push_str(&format!(
            "<tr><th>{}</th><td>{}</td></tr>",
            escape_html(key),
            escape_html(&text)
        ));
    }

    let body = format!(
        r#"<header><h1>Opportunity</h1><p class="subtitle">{id}</p></header>
<table class="fields">{rows}</table>
<form method="post" action="/action" class="actions">
  <input type="hidden" name="id" value="{id}" />
  <button class="btn-primary" type="submit" name="edit" value="1">Edit</button>
  <button class="btn-secondary" type="submit" name="delete" value="1">Delete</button>
</form>
<p><a href="/">Back to dashboard</a></p>"#,
        id = escape_html(id),
    );
    page("Opportunity", &body)
}

pub fn render_edit_form(id: Option<&str>, fields: &OpportunityFields) -> String {
    let (action, label, title) = match id {
        Some(_) => ("update", "Update", "Edit opportunity"),
        None => ("create", "Create", "New opportunity"),
    };
    let body = format!(
        r#"<header><h1>{title}</h1></header>
<form method="post" action="/opportunity" class="edit">
  <input type="hidden" name="id" value="{id}" />
  <label>Name <input type="text" name="Name" value="{name}" /></label>
  <label>Industry <input type="text" name="Industry" value="{industry}" /></label>
  <label>Ticker symbol <input type="text" name="TickerSymbol" value="{ticker}" /></label>
  <button class="btn-primary" type="submit" name="{action}" value="1">{label}</button>
</form>
<p><a href="/">Back to dashboard</a></p>"#,
        id = escape_html(id.unwrap_or_default()),
        name = escape_html(&fields.name),
        industry = escape_html(&fields.industry),
        ticker = escape_html(&fields.ticker_symbol),
    );
    page(title, &body)
}

/// Result page after a create, update or delete.
pub fn render_done(action: &str, id: &str) -> String {
    let body = format!(
        r#"<header><h1>{action}</h1><p class="subtitle">Opportunity {id}</p></header>
<p><a href="/detail?id={id}">View record</a> · <a href="/">Back to dashboard</a></p>"#,
        action = escape_html(action),
        id = escape_html(id),
    );
    page(action, &body)
}

pub fn render_logout(crm_logout_url: Option<&str>) -> String {
    let frame = crm_logout_url
        .map(|url| {
            format!(
                r#"<iframe src="{}" width="0" height="0" style="display:none"></iframe>"#,
                escape_html(url)
            )
        })
        .unwrap_or_default();
    let body = format!(
        r#"<header><h1>Logged out</h1><p class="subtitle">Your CRM access token has been revoked.</p></header>
{frame}
<p><a href="/">Log in again</a></p>"#
    );
    page("Logged out", &body)
}

/// `detail` is only passed when debug error pages are enabled.
pub fn render_error(message: &str, detail: Option<&str>) -> String {
    let detail = detail
        .map(|text| format!("<pre class=\"trace\">{}</pre>", escape_html(text)))
        .unwrap_or_default();
    let body = format!(
        r#"<header><h1>Something went wrong</h1><p class="subtitle">{}</p></header>
{detail}
<p><a href="/">Back to dashboard</a></p>"#,
        escape_html(message)
    );
    page("Error", &body)
}

const PAGE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>{{TITLE}}</title>
  <style>
    @import url('https://fonts.googleapis.com/css2?family=Space+Grotesk:wght@400;500;600&family=Fraunces:wght@600&display=swap');

    :root {
      --bg-1: #f8f3e6;
      --bg-2: #f5d3a7;
      --ink: #2b2a28;
      --accent: #ff6b4a;
      --accent-2: #2f4858;
      --card: rgba(255, 255, 255, 0.86);
      --shadow: 0 24px 60px rgba(47, 72, 88, 0.18);
    }

    * {
      box-sizing: border-box;
    }

    body {
      margin: 0;
      min-height: 100vh;
      background: radial-gradient(circle at top, var(--bg-2), transparent 60%),
        linear-gradient(135deg, var(--bg-1), #ffe9d4 60%, #f9f2e9 100%);
      color: var(--ink);
      font-family: "Space Grotesk", "Trebuchet MS", sans-serif;
      display: grid;
      place-items: center;
      padding: 32px 18px 48px;
    }

    .app {
      width: min(960px, 100%);
      background: var(--card);
      backdrop-filter: blur(12px);
      border-radius: 28px;
      box-shadow: var(--shadow);
      padding: 36px;
      display: grid;
      gap: 28px;
    }

    header {
      display: flex;
      flex-direction: column;
      gap: 6px;
    }

    h1 {
      font-family: "Fraunces", "Georgia", serif;
      font-weight: 600;
      font-size: clamp(2rem, 4vw, 2.6rem);
      margin: 0;
    }

    .subtitle {
      margin: 0;
      color: #5f5c57;
    }

    .panel {
      display: grid;
      grid-template-columns: repeat(auto-fit, minmax(180px, 1fr));
      gap: 16px;
    }

    .stat {
      background: white;
      border-radius: 18px;
      padding: 18px;
      border: 1px solid rgba(47, 72, 88, 0.08);
      display: grid;
      gap: 8px;
    }

    .stat .label {
      font-size: 0.85rem;
      text-transform: uppercase;
      letter-spacing: 0.12em;
      color: #8b857d;
    }

    .stat .value {
      font-size: 1.5rem;
      font-weight: 600;
      color: var(--accent-2);
    }

    .chart-card {
      background: white;
      border-radius: 20px;
      padding: 16px;
      border: 1px solid rgba(47, 72, 88, 0.08);
    }

    #chart {
      width: 100%;
      height: 300px;
      display: block;
    }

    .chart-grid {
      stroke: rgba(47, 72, 88, 0.12);
    }

    .chart-label {
      fill: #7a746d;
      font-size: 11px;
    }

    .legend {
      display: flex;
      flex-wrap: wrap;
      gap: 12px;
      font-size: 0.9rem;
    }

    .legend span::before {
      content: "";
      display: inline-block;
      width: 14px;
      height: 4px;
      margin-right: 6px;
      vertical-align: middle;
      background: var(--swatch);
    }

    .actions, .edit {
      display: flex;
      flex-wrap: wrap;
      gap: 12px;
      align-items: end;
    }

    .edit label {
      display: grid;
      gap: 4px;
      font-size: 0.9rem;
    }

    input[type="text"] {
      border: 1px solid rgba(47, 72, 88, 0.2);
      border-radius: 12px;
      padding: 10px 12px;
      font: inherit;
    }

    button {
      appearance: none;
      border: none;
      border-radius: 999px;
      padding: 12px 18px;
      font: inherit;
      font-weight: 600;
      cursor: pointer;
      color: white;
    }

    .btn-primary {
      background: var(--accent);
    }

    .btn-secondary {
      background: var(--accent-2);
    }

    table.fields th {
      text-align: left;
      padding-right: 16px;
      color: #8b857d;
    }

    .trace {
      white-space: pre-wrap;
      font-size: 0.85rem;
      background: white;
      padding: 12px;
      border-radius: 12px;
    }

    .hint {
      margin: 0;
      color: #6f6a65;
      font-size: 0.9rem;
    }

    @media (max-width: 600px) {
      .app {
        padding: 28px 22px;
      }
    }
  </style>
</head>
<body>
  <main class="app">
{{BODY}}
  </main>
</body>
</html>
"#;

const DASHBOARD_HTML: &str = r#"<header>
  <h1>Opportunity Edits</h1>
  <p class="subtitle">Opportunity history edits per day, {{WINDOW}}.</p>
</header>

<section class="panel">
  <div class="stat"><span class="label">Edits</span><span class="value">{{TOTAL}}</span></div>
  <div class="stat"><span class="label">Authors</span><span class="value">{{AUTHORS}}</span></div>
  <div class="stat"><span class="label">From</span><span class="value">{{FIRST}}</span></div>
  <div class="stat"><span class="label">To</span><span class="value">{{LAST}}</span></div>
</section>

<section class="chart-card">
  <svg id="chart" viewBox="0 0 800 300" aria-label="Edits per day" role="img"></svg>
  <div class="legend" id="legend"></div>
</section>
{{NOTICE}}

<section class="actions">
  <form method="get" action="/detail" class="actions">
    <input type="text" name="id" placeholder="Opportunity id" />
    <button class="btn-secondary" type="submit">Open</button>
  </form>
  <form method="post" action="/action">
    <button class="btn-primary" type="submit" name="new" value="1">New opportunity</button>
  </form>
  <form method="get" action="/logout">
    <button class="btn-secondary" type="submit">Log out</button>
  </form>
</section>

<script id="chart-data" type="application/json">{{DATA}}</script>
<script>
  const chart = JSON.parse(document.getElementById('chart-data').textContent);
  const chartEl = document.getElementById('chart');
  const legendEl = document.getElementById('legend');

  const render = () => {
    if (!chart || !chart.dates.length) {
      chartEl.innerHTML = '<text class="chart-label" x="50%" y="50%" text-anchor="middle">No opportunity edits in this window</text>';
      return;
    }

    const width = 800;
    const height = 300;
    const paddingX = 44;
    const paddingY = 34;
    const top = 20;

    const max = Math.max(1, ...chart.series.flatMap((line) => line.values));
    const xStep = chart.dates.length > 1 ? (width - paddingX * 2) / (chart.dates.length - 1) : 0;
    const scaleY = (height - top - paddingY) / max;
    const x = (index) => paddingX + index * xStep;
    const y = (value) => height - paddingY - value * scaleY;

    let grid = '';
    const ticks = 4;
    for (let i = 0; i <= ticks; i += 1) {
      const value = (max * i) / ticks;
      grid += `<line class="chart-grid" x1="${paddingX}" y1="${y(value)}" x2="${width - paddingX}" y2="${y(value)}" />`;
      grid += `<text class="chart-label" x="${paddingX - 10}" y="${y(value) + 4}" text-anchor="end">${Math.round(value * 10) / 10}</text>`;
    }

    const labelEvery = Math.max(1, Math.ceil(chart.dates.length / 10));
    const labels = chart.dates
      .map((date, index) => index % labelEvery === 0
        ? `<text class="chart-label" x="${x(index)}" y="${height - paddingY + 18}" text-anchor="middle">${date.slice(5)}</text>`
        : '')
      .join('');

    const lines = chart.series
      .map((line) => {
        const d = line.values
          .map((value, index) => `${index === 0 ? 'M' : 'L'} ${x(index).toFixed(2)} ${y(value).toFixed(2)}`)
          .join(' ');
        const s = line.style;
        return `<path d="${d}" fill="none" stroke="${s.stroke}" stroke-width="${s['stroke-width']}" opacity="${s.opacity}"
          onmouseover="this.setAttribute('stroke-width', ${line['hover-stroke-width']})"
          onmouseout="this.setAttribute('stroke-width', ${s['stroke-width']})"></path>`;
      })
      .join('');

    chartEl.innerHTML = `${grid}${lines}${labels}`;

    legendEl.innerHTML = '';
    chart.series.forEach((line) => {
      const item = document.createElement('span');
      item.textContent = line.label;
      item.style.setProperty('--swatch', line.style.stroke);
      legendEl.appendChild(item);
    });
  };

  render();
</script>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{EditEvent, aggregate_at};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn authors_get_palette_styles_by_index() {
        let events = vec![EditEvent::new(day(1), "Bob"), EditEvent::new(day(2), "Alice")];
        let series = aggregate_at(day(3), &events, SeriesMode::PerAuthor).unwrap();
        let chart = build_chart(Some(&series), SeriesMode::PerAuthor, "last 90 days");

        assert_eq!(chart.series.len(), 2);
        assert_eq!(chart.series[0].label, "Alice");
        assert_eq!(chart.series[0].style, PALETTE[0]);
        assert_eq!(chart.series[1].label, "Bob");
        assert_eq!(chart.series[1].values, vec![1, 0, 0]);
        assert_eq!(chart.total_edits, 2);
    }

    #[test]
    fn authors_beyond_palette_are_omitted() {
        let events: Vec<EditEvent> = (0..PALETTE.len() + 2)
            .map(|idx| EditEvent::new(day(1), format!("author-{idx:02}")))
            .collect();
        let series = aggregate_at(day(1), &events, SeriesMode::PerAuthor).unwrap();
        let chart = build_chart(Some(&series), SeriesMode::PerAuthor, "last 90 days");

        assert_eq!(chart.series.len(), PALETTE.len());
        assert_eq!(chart.unstyled_authors, vec!["author-13", "author-14"]);
        assert_eq!(chart.authors.len(), PALETTE.len() + 2);
        assert!(render_dashboard(&chart).contains("palette exhausted"));
    }

    #[test]
    fn total_mode_draws_one_line() {
        let events = vec![EditEvent::new(day(1), "Bob"), EditEvent::new(day(1), "Alice")];
        let series = aggregate_at(day(2), &events, SeriesMode::Total).unwrap();
        let chart = build_chart(Some(&series), SeriesMode::Total, "last 4 quarters");

        assert_eq!(chart.series.len(), 1);
        assert_eq!(chart.series[0].values, vec![2, 0]);
    }

    #[test]
    fn empty_window_renders_empty_state() {
        let chart = build_chart(None, SeriesMode::PerAuthor, "last 90 days");
        assert!(chart.is_empty());
        let html = render_dashboard(&chart);
        assert!(html.contains("No opportunity edits in this window"));
        assert!(html.contains(r#""dates":[]"#));
    }

    #[test]
    fn author_names_cannot_break_out_of_the_script() {
        let events = vec![EditEvent::new(day(1), "</script><script>alert(1)")];
        let series = aggregate_at(day(1), &events, SeriesMode::PerAuthor).unwrap();
        let html = render_dashboard(&build_chart(Some(&series), SeriesMode::PerAuthor, "w"));
        assert!(!html.contains("</script><script>alert(1)"));
    }

    #[test]
    fn author_names_cannot_expand_template_markers() {
        let mut events: Vec<EditEvent> = (0..PALETTE.len())
            .map(|idx| EditEvent::new(day(1), format!("a{idx:02}")))
            .collect();
        events.push(EditEvent::new(day(1), "{{DATA}}"));
        events.push(EditEvent::new(day(1), "<img src=x onerror=alert(1)>"));
        let series = aggregate_at(day(1), &events, SeriesMode::PerAuthor).unwrap();
        let chart = build_chart(Some(&series), SeriesMode::PerAuthor, "last 90 days");

        let html = render_dashboard(&chart);
        assert!(!html.contains("<img src=x onerror=alert(1)>"));
        assert!(html.contains("palette exhausted): "));
        assert!(html.contains("{{DATA}}"));
    }

    #[test]
    fn fill_leaves_unknown_markers_alone() {
        assert_eq!(fill("{{A}}-{{B}}-{{", &[("A", "{{B}}")]), "{{B}}-{{B}}-{{");
    }

    #[test]
    fn serialized_style_uses_svg_attribute_names() {
        let json = serde_json::to_value(PALETTE[0]).unwrap();
        assert_eq!(json["stroke-width"], 3);
        assert_eq!(json["stroke"], "#ff9900");
    }

    #[test]
    fn error_page_escapes_message() {
        let html = render_error("bad <input>", Some("trace & more"));
        assert!(html.contains("bad &lt;input&gt;"));
        assert!(html.contains("trace &amp; more"));
    }
}
