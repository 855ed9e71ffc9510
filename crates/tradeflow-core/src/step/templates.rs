//! Fixed per-role instructions, output shapes and analyst tool lists.

use crate::collab::{OutputShape, ToolKind};
use crate::domain::{AnalystRole, NodeId, RiskSpeaker};

/// A tool an analyst calls before reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolBinding {
    pub kind: ToolKind,
    pub lookback_days: Option<u32>,
}

const fn tool(kind: ToolKind, lookback_days: Option<u32>) -> ToolBinding {
    ToolBinding {
        kind,
        lookback_days,
    }
}

/// Tools run by each analyst's tool sub-step.
pub fn analyst_tools(role: AnalystRole) -> &'static [ToolBinding] {
    const MARKET: &[ToolBinding] = &[
        tool(ToolKind::PriceHistory, Some(60)),
        tool(ToolKind::TechnicalIndicators, Some(60)),
    ];
    const SOCIAL: &[ToolBinding] = &[
        tool(ToolKind::StockNews, Some(7)),
        tool(ToolKind::Sentiment, Some(7)),
    ];
    const NEWS: &[ToolBinding] = &[
        tool(ToolKind::GlobalNews, Some(7)),
        tool(ToolKind::StockNews, Some(7)),
    ];
    const FUNDAMENTALS: &[ToolBinding] = &[
        tool(ToolKind::Fundamentals, None),
        tool(ToolKind::FinancialStatements, None),
    ];
    const METAPHYSICS: &[ToolBinding] = &[
        tool(ToolKind::PriceHistory, Some(30)),
        tool(ToolKind::CompanyInfo, None),
        tool(ToolKind::Calendar, None),
    ];
    match role {
        AnalystRole::Market => MARKET,
        AnalystRole::Social => SOCIAL,
        AnalystRole::News => NEWS,
        AnalystRole::Fundamentals => FUNDAMENTALS,
        AnalystRole::Metaphysics => METAPHYSICS,
    }
}

/// Structured report shape requested from each analyst.
pub fn analyst_shape(role: AnalystRole) -> OutputShape {
    match role {
        AnalystRole::Market => OutputShape::new(
            "market_analysis",
            &[
                ("market_sentiment_summary", "A few sentences on market sentiment for the stock."),
                ("stock_performance_analysis", "Recent price, volume and volatility behaviour."),
                ("key_technical_indicators", "Key indicators such as RSI, MACD and moving averages."),
                ("conclusion", "Whether the stock is attractive right now, and why."),
            ],
        ),
        AnalystRole::Social => OutputShape::new(
            "sentiment_analysis",
            &[
                ("sentiment_summary", "Overall retail and social-media mood."),
                ("key_discussions", "Dominant discussion threads and their tone."),
                ("conclusion", "What the sentiment implies for the stock."),
            ],
        ),
        AnalystRole::News => OutputShape::new(
            "news_analysis",
            &[
                ("headline_summary", "The most relevant recent headlines."),
                ("macro_impact", "Macro and policy developments affecting the market."),
                ("company_impact", "Company-specific news and its likely effect."),
                ("conclusion", "Net effect of the news flow on the stock."),
            ],
        ),
        AnalystRole::Fundamentals => OutputShape::new(
            "fundamentals_analysis",
            &[
                ("financial_health", "Balance sheet strength, leverage and cash flow."),
                ("valuation", "Valuation relative to history and peers."),
                ("growth_outlook", "Revenue and earnings trajectory."),
                ("conclusion", "Whether fundamentals support the current price."),
            ],
        ),
        AnalystRole::Metaphysics => OutputShape::new(
            "metaphysics_analysis",
            &[
                ("five_elements_analysis", "Reading based on the Five Elements."),
                ("eight_trigrams_analysis", "Reading based on the Eight Trigrams."),
                ("heavenly_stems_analysis", "Timing from Heavenly Stems and Earthly Branches."),
                ("metaphysics_forecast", "Forecast for the stock's next move."),
                ("auspicious_timing", "Favourable trading windows from the traditional calendar."),
            ],
        ),
    }
}

/// System instructions for a node.
pub fn instructions(node: NodeId) -> &'static str {
    match node {
        NodeId::Analyst(AnalystRole::Market) => {
            "You are a market analyst. Study the price history and technical indicators \
             provided and report on the stock's recent performance. Account for daily price \
             limits, T+1 settlement and policy-driven flows where relevant."
        }
        NodeId::Analyst(AnalystRole::Social) => {
            "You are a social media analyst. Judge public sentiment about the company from \
             the news and sentiment data provided."
        }
        NodeId::Analyst(AnalystRole::News) => {
            "You are a news analyst. Summarise the global and company news provided and \
             explain how it is likely to move the stock."
        }
        NodeId::Analyst(AnalystRole::Fundamentals) => {
            "You are a fundamentals analyst. Assess the company's financial statements, \
             valuation and growth prospects."
        }
        NodeId::Analyst(AnalystRole::Metaphysics) => {
            "You are an analyst versed in traditional Chinese metaphysics. Read the stock \
             through the Five Elements, the Eight Trigrams and the traditional calendar, \
             using the market data provided as grounding."
        }
        NodeId::ResearchManager => {
            "You are the research manager. Consolidate the analyst reports into a research \
             plan that frames the key questions the bull and bear researchers must settle."
        }
        NodeId::BullResearcher => {
            "You are the bull researcher. Build the strongest evidence-based case for \
             investing, and rebut the bear's latest points directly."
        }
        NodeId::BearResearcher => {
            "You are the bear researcher. Build the strongest evidence-based case against \
             investing, and rebut the bull's latest points directly."
        }
        NodeId::Trader => {
            "You are the trader. Turn the research and the bull/bear debate into a concrete \
             trading plan with entry, sizing and exit. End with \
             'FINAL TRANSACTION PROPOSAL: **BUY/HOLD/SELL**'."
        }
        NodeId::Conservative => {
            "You are the conservative risk analyst. Protect capital: challenge the trader's \
             plan wherever downside risk is underpriced."
        }
        NodeId::Aggressive => {
            "You are the aggressive risk analyst. Champion upside: argue where caution in the \
             plan leaves returns on the table."
        }
        NodeId::Neutral => {
            "You are the neutral risk analyst. Weigh the conservative and aggressive views \
             and propose a balanced adjustment."
        }
        NodeId::InvestJudge => {
            "You are the investment judge. Weigh the trader's plan, every analyst report and \
             the risk debate, and give a clear, actionable investment verdict."
        }
        NodeId::RiskManager => {
            "You are the risk manager and make the final call. Use the judge's verdict and \
             the risk debate to approve, adjust or reject the trader's plan. End with \
             'FINAL TRANSACTION PROPOSAL: **BUY/HOLD/SELL**'."
        }
    }
}

/// Instructions for the debater speaking as `speaker`.
pub fn risk_instructions(speaker: RiskSpeaker) -> &'static str {
    match speaker {
        RiskSpeaker::Conservative => instructions(NodeId::Conservative),
        RiskSpeaker::Aggressive => instructions(NodeId::Aggressive),
        RiskSpeaker::Neutral => instructions(NodeId::Neutral),
    }
}

/// Instructions used when reflecting on a finished run.
pub const REFLECTION_INSTRUCTIONS: &str =
    "You are reviewing a past trading analysis now that the real outcome is known. \
     Decide whether the reasoning below was right or wrong given the realised return, \
     identify the factors that mattered most, and state concretely what should be done \
     differently in a similar situation. Finish with a one-paragraph lesson that can be \
     reused as advice.";
