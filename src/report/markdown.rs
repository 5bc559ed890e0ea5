//! Markdown report rendering.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde_json::Value;

use crate::analysis::AnalysisResult;

/// Everything a report is rendered from.
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub stock_code: &'a str,
    pub stock_name: &'a str,
    pub trade_date: &'a str,
    pub generated_at: DateTime<Local>,
    pub elapsed: Duration,
    pub engine: &'a str,
    pub result: &'a AnalysisResult,
}

impl ReportContext<'_> {
    /// Document title, `<code>_<name>_分析报告_<timestamp>`.
    pub fn title(&self) -> String {
        let name = if self.stock_name.is_empty() { self.stock_code } else { self.stock_name };
        format!("{}_{}_分析报告_{}", self.stock_code, name, self.generated_at.format("%Y%m%d_%H%M%S"))
    }
}

const REPORT_SECTIONS: [(&str, &str, &str); 5] = [
    ("📈 技术分析报告", "market_report", "暂无技术分析报告"),
    ("📋 基本面分析报告", "fundamentals_report", "暂无基本面分析报告"),
    ("📰 新闻分析报告", "news_report", "暂无新闻分析报告"),
    ("😊 情绪分析报告", "sentiment_report", "暂无情绪分析报告"),
    ("🎯 风险评估", "risk_assessment", "暂无风险评估报告"),
];

/// Render a decision: strings as they are, objects as a bullet list.
pub fn render_decision(decision: &Value) -> String {
    match decision {
        Value::Null => "暂无决策结果".to_string(),
        Value::String(s) if s.trim().is_empty() => "暂无决策结果".to_string(),
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) if map.is_empty() => "暂无决策结果".to_string(),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| format!("- **{key}**: {}", scalar(value)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => scalar(other),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render the full Markdown report.
pub fn render_markdown(ctx: &ReportContext<'_>) -> String {
    let result = ctx.result;
    let generated = ctx.generated_at.format("%Y-%m-%d %H:%M:%S");
    let request_date = ctx.generated_at.format("%Y/%m/%d");
    let elapsed = ctx.elapsed.as_secs_f64();
    let name = if ctx.stock_name.is_empty() { "-" } else { ctx.stock_name };

    let mut out = String::new();
    let _ = writeln!(out, "# {} {} 股票分析报告\n", ctx.stock_code, name);

    let _ = writeln!(out, "## 📊 基本信息");
    let _ = writeln!(out, "- **股票代码**: {}", ctx.stock_code);
    let _ = writeln!(out, "- **股票名称**: {name}");
    let _ = writeln!(out, "- **请求日期**: {request_date}");
    let _ = writeln!(out, "- **交易日期**: {}", ctx.trade_date);
    let _ = writeln!(out, "- **分析时间**: {generated}");
    let _ = writeln!(out, "- **分析引擎**: {}", ctx.engine);
    let _ = writeln!(out, "- **分析耗时**: {elapsed:.2}秒\n");

    let _ = writeln!(out, "## 📊 最终投资决策");
    let _ = writeln!(out, "{}\n", render_decision(&result.decision));

    for (heading, key, placeholder) in REPORT_SECTIONS {
        let body = result.report(key).unwrap_or_else(|| placeholder.to_string());
        let _ = writeln!(out, "## {heading}");
        let _ = writeln!(out, "{body}\n");
    }

    let company = result.report("company_of_interest").unwrap_or_else(|| ctx.stock_code.to_string());
    let trade_date = result.report("trade_date").unwrap_or_else(|| ctx.trade_date.to_string());
    let _ = writeln!(out, "## 🔍 详细状态信息");
    let _ = writeln!(out, "- 分析公司: {company}");
    let _ = writeln!(out, "- 交易日期: {trade_date}");
    let _ = writeln!(out, "- 分析师数量: {} 个消息\n", result.message_count());

    out.push_str(METHOD_NOTES);
    out.push_str(DISCLAIMER);

    let _ = writeln!(out, "---");
    let _ = writeln!(out, "**报告生成信息**:");
    let _ = writeln!(out, "- 请求日期: {request_date}");
    let _ = writeln!(out, "- 生成时间: {generated}");
    let _ = writeln!(out, "- 生成工具: larkflow {}", env!("CARGO_PKG_VERSION"));
    out
}

const METHOD_NOTES: &str = "## 📈 分析方法说明
本报告由多智能体分析系统生成，分析流程如下：

1. **数据收集**: 收集最新的市场数据、财务数据和新闻信息
2. **技术分析**: 运用多种技术指标和图表形态分析
3. **基本面分析**: 分析公司财务状况和行业地位
4. **风险评估**: 评估投资风险和市场风险
5. **智能决策**: 多智能体协作生成投资建议

";

const DISCLAIMER: &str = "## ⚠️ 重要声明
**风险提示**: 股市有风险，投资需谨慎。本分析报告仅供参考，不构成具体的投资建议。

**免责声明**: 本报告基于公开信息和AI分析方法，分析结果可能存在不确定性。投资者应结合自身情况，独立判断，自主决策。

";
