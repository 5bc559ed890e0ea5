//! Canned analysis for test runs.

use serde_json::json;

use super::{AnalysisResult, Analyzer};

/// Returns a fixed, deterministic result without calling any framework.
///
/// Used by `test-run` to exercise the token, table, document and
/// write-back paths on their own.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAnalyzer;

impl Analyzer for SimulatedAnalyzer {
    fn name(&self) -> &str {
        "simulated"
    }

    fn analyze(&self, company: &str, trade_date: &str) -> anyhow::Result<AnalysisResult> {
        tracing::info!(company, trade_date, "producing simulated analysis");
        Ok(AnalysisResult {
            state: json!({
                "company_of_interest": company,
                "trade_date": trade_date,
                "market_report": format!(
                    "{company} 模拟技术分析：均线多头排列，成交量温和放大，短期趋势偏强。"
                ),
                "fundamentals_report": "模拟基本面分析：营收稳定增长，估值处于行业中位。",
                "news_report": "模拟新闻分析：近期无重大负面公告。",
                "sentiment_report": "模拟情绪分析：市场情绪中性偏乐观。",
                "risk_assessment": "模拟风险评估：波动率适中，注意大盘系统性风险。",
                "messages": ["market", "fundamentals", "news", "sentiment"],
            }),
            decision: json!({
                "action": "HOLD",
                "confidence": 0.6,
                "reasoning": "模拟结果，仅用于流程测试",
            }),
        })
    }
}
