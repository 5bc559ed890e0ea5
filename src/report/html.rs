//! HTML rendering of Markdown reports for the local file tier.

use chrono::{DateTime, Local};
use pulldown_cmark::{html, Event, Options, Parser};

fn options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
}

/// Escape plain text for an HTML body.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    html::push_html(&mut out, std::iter::once(Event::Text(text.into())));
    out
}

/// Convert Markdown to an HTML fragment.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len() * 2);
    html::push_html(&mut out, Parser::new_ext(markdown, options()));
    out
}

/// Render a standalone HTML page for a report.
pub fn render_page(
    stock_code: &str,
    stock_name: &str,
    markdown: &str,
    generated_at: DateTime<Local>,
) -> String {
    let title = escape_text(&format!("{stock_code} {stock_name} 股票分析报告"));
    let generated = generated_at.format("%Y-%m-%d %H:%M:%S");

    format!(
        r#"<!DOCTYPE html>
<html lang="zh-CN">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title}</title>
<style>
body {{ font-family: 'Microsoft YaHei', Arial, sans-serif; max-width: 1100px; margin: 0 auto; padding: 20px; line-height: 1.6; }}
.header {{ background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white; padding: 24px; border-radius: 12px; text-align: center; }}
h1 {{ color: #2c3e50; border-bottom: 3px solid #3498db; padding-bottom: 8px; }}
h2 {{ color: #34495e; border-bottom: 2px solid #3498db; padding-bottom: 4px; margin-top: 28px; }}
table {{ border-collapse: collapse; margin: 12px 0; }}
th, td {{ border: 1px solid #dee2e6; padding: 6px 12px; }}
th {{ background: #f1f3f5; }}
code {{ background: #f1f3f5; padding: 0 4px; border-radius: 3px; }}
pre {{ background: #f8f9fa; padding: 12px; border-left: 4px solid #6c757d; overflow-x: auto; }}
.timestamp {{ color: #6c757d; font-size: 0.9em; text-align: center; margin-top: 40px; border-top: 2px solid #dee2e6; padding-top: 16px; }}
</style>
</head>
<body>
<div class="header">
<h1>{title}</h1>
<p>股票代码: {code} | 股票名称: {name} | 分析时间: {generated}</p>
</div>
{body}<div class="timestamp">报告生成时间: {generated}</div>
</body>
</html>
"#,
        code = escape_text(stock_code),
        name = escape_text(stock_name),
        body = markdown_to_html(markdown),
    )
}
