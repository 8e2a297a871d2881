//! Built-in metric and mapping catalog.
//!
//! The default set of standardized metrics and their us-gaap concept
//! fallback chains. Priorities reflect how issuers actually tag: the
//! post-ASC-606 revenue concept first, older concepts as fallbacks with
//! reduced confidence.

use normalize_core::{ConceptMapping, MetricCategory, MetricDataType, StandardizedMetric};

/// The built-in standardized metric definitions.
#[must_use]
pub fn metrics() -> Vec<StandardizedMetric> {
    use MetricCategory::{BalanceSheet, CashFlow, IncomeStatement, Other, Ratio};
    use MetricDataType::{Monetary, Ratio as RatioType, Shares};

    vec![
        // Income statement
        StandardizedMetric::new("revenue", "Total Revenue", IncomeStatement, Monetary),
        StandardizedMetric::new("cost_of_revenue", "Cost of Revenue", IncomeStatement, Monetary),
        StandardizedMetric::new("gross_profit", "Gross Profit", IncomeStatement, Monetary),
        StandardizedMetric::new("operating_income", "Operating Income", IncomeStatement, Monetary),
        StandardizedMetric::new("net_income", "Net Income", IncomeStatement, Monetary),
        // Balance sheet
        StandardizedMetric::new("total_assets", "Total Assets", BalanceSheet, Monetary),
        StandardizedMetric::new("current_assets", "Current Assets", BalanceSheet, Monetary),
        StandardizedMetric::new(
            "cash_and_equivalents",
            "Cash and Cash Equivalents",
            BalanceSheet,
            Monetary,
        ),
        StandardizedMetric::new("total_liabilities", "Total Liabilities", BalanceSheet, Monetary),
        StandardizedMetric::new(
            "current_liabilities",
            "Current Liabilities",
            BalanceSheet,
            Monetary,
        ),
        StandardizedMetric::new("long_term_debt", "Long-term Debt", BalanceSheet, Monetary),
        StandardizedMetric::new(
            "stockholders_equity",
            "Stockholders' Equity",
            BalanceSheet,
            Monetary,
        ),
        // Cash flow
        StandardizedMetric::new(
            "operating_cash_flow",
            "Operating Cash Flow",
            CashFlow,
            Monetary,
        ),
        StandardizedMetric::new("capex", "Capital Expenditures", CashFlow, Monetary),
        // Shares and per-share
        StandardizedMetric::new("eps_diluted", "EPS (Diluted)", Other, Monetary),
        StandardizedMetric::new("shares_outstanding", "Shares Outstanding", Other, Shares),
        // Derived
        StandardizedMetric::new("gross_margin", "Gross Margin", Ratio, RatioType)
            .with_calculation_rule("(revenue - cost_of_revenue) / revenue"),
        StandardizedMetric::new("operating_margin", "Operating Margin", Ratio, RatioType)
            .with_calculation_rule("operating_income / revenue"),
        StandardizedMetric::new("net_margin", "Net Margin", Ratio, RatioType)
            .with_calculation_rule("net_income / revenue"),
        StandardizedMetric::new("current_ratio", "Current Ratio", Ratio, RatioType)
            .with_calculation_rule("current_assets / current_liabilities"),
        StandardizedMetric::new("debt_to_equity", "Debt to Equity", Ratio, RatioType)
            .with_calculation_rule("long_term_debt / stockholders_equity"),
        StandardizedMetric::new("free_cash_flow", "Free Cash Flow", CashFlow, Monetary)
            .with_calculation_rule("operating_cash_flow - capex"),
    ]
}

/// The built-in concept mapping rules.
#[must_use]
pub fn mappings() -> Vec<ConceptMapping> {
    vec![
        // revenue
        ConceptMapping::new(
            "revenue",
            "us-gaap:RevenueFromContractWithCustomerExcludingAssessedTax",
            1,
            1.0,
        ),
        ConceptMapping::new("revenue", "us-gaap:SalesRevenueNet", 2, 0.95),
        ConceptMapping::new("revenue", "us-gaap:Revenues", 3, 0.90),
        // Depository institutions report revenue as interest income.
        ConceptMapping::new(
            "revenue",
            "us-gaap:InterestAndDividendIncomeOperating",
            1,
            0.85,
        )
        .with_industry("60"),
        // cost_of_revenue
        ConceptMapping::new("cost_of_revenue", "us-gaap:CostOfGoodsAndServicesSold", 1, 1.0),
        ConceptMapping::new("cost_of_revenue", "us-gaap:CostOfRevenue", 2, 0.95),
        // gross_profit
        ConceptMapping::new("gross_profit", "us-gaap:GrossProfit", 1, 1.0),
        // operating_income
        ConceptMapping::new("operating_income", "us-gaap:OperatingIncomeLoss", 1, 1.0),
        // net_income
        ConceptMapping::new("net_income", "us-gaap:NetIncomeLoss", 1, 1.0),
        ConceptMapping::new(
            "net_income",
            "us-gaap:NetIncomeLossAttributableToParent",
            2,
            0.95,
        ),
        ConceptMapping::new("net_income", "us-gaap:ProfitLoss", 3, 0.85),
        // balance sheet
        ConceptMapping::new("total_assets", "us-gaap:Assets", 1, 1.0),
        ConceptMapping::new("current_assets", "us-gaap:AssetsCurrent", 1, 1.0),
        ConceptMapping::new(
            "cash_and_equivalents",
            "us-gaap:CashAndCashEquivalentsAtCarryingValue",
            1,
            1.0,
        ),
        ConceptMapping::new("total_liabilities", "us-gaap:Liabilities", 1, 1.0),
        ConceptMapping::new("current_liabilities", "us-gaap:LiabilitiesCurrent", 1, 1.0),
        ConceptMapping::new("long_term_debt", "us-gaap:LongTermDebtNoncurrent", 1, 1.0),
        ConceptMapping::new("long_term_debt", "us-gaap:LongTermDebt", 2, 0.95),
        ConceptMapping::new("stockholders_equity", "us-gaap:StockholdersEquity", 1, 1.0),
        ConceptMapping::new(
            "stockholders_equity",
            "us-gaap:StockholdersEquityIncludingPortionAttributableToNoncontrollingInterest",
            2,
            0.95,
        ),
        // cash flow
        ConceptMapping::new(
            "operating_cash_flow",
            "us-gaap:NetCashProvidedByUsedInOperatingActivities",
            1,
            1.0,
        ),
        ConceptMapping::new(
            "capex",
            "us-gaap:PaymentsToAcquirePropertyPlantAndEquipment",
            1,
            1.0,
        ),
        // shares and per-share
        ConceptMapping::new("eps_diluted", "us-gaap:EarningsPerShareDiluted", 1, 1.0),
        ConceptMapping::new(
            "shares_outstanding",
            "us-gaap:CommonStockSharesOutstanding",
            1,
            1.0,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mapping_targets_a_defined_metric() {
        let ids: std::collections::HashSet<String> =
            metrics().into_iter().map(|m| m.metric_id).collect();
        for mapping in mappings() {
            assert!(ids.contains(&mapping.metric_id), "{}", mapping.metric_id);
        }
    }

    #[test]
    fn every_direct_metric_has_a_rule() {
        let mapped: std::collections::HashSet<String> =
            mappings().into_iter().map(|m| m.metric_id).collect();
        for metric in metrics() {
            if !metric.is_derived() {
                assert!(mapped.contains(&metric.metric_id), "{}", metric.metric_id);
            }
        }
    }
}
