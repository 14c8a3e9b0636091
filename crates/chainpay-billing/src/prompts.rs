//! Text generator prompts for invoices, renewal reminders and analytics.

use chrono::DateTime;

use crate::model::{to_display_units, Merchant, Payment, Plan, Subscription};

fn format_datetime(unix: i64) -> String {
    DateTime::from_timestamp(unix, 0)
        .map_or_else(|| unix.to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

fn format_date(unix: i64) -> String {
    DateTime::from_timestamp(unix, 0)
        .map_or_else(|| unix.to_string(), |dt| dt.format("%Y-%m-%d").to_string())
}

pub fn invoice_prompt(merchant: &Merchant, payment: &Payment, currency: &str) -> String {
    format!(
        r"Generate a professional invoice in plain text format:

Merchant Wallet: {merchant}
Payer Wallet: {payer}
Amount: {amount} {currency}
Transaction Hash: {tx_hash}
Timestamp: {timestamp}

Include:
- Invoice number ({invoice_number})
- Payment summary
- Formatted date
- Transaction details
- Professional thank you message
- Keep it concise and professional",
        merchant = merchant.wallet,
        payer = payment.payer,
        amount = to_display_units(payment.amount),
        tx_hash = payment.tx_hash,
        timestamp = format_datetime(payment.timestamp),
        invoice_number = payment.invoice_number(),
    )
}

/// Reminder for a subscription that just moved to `payment_required`
///
/// `lapsed_at` is the period end that was missed; the subscription carries
/// the tentative next one.
pub fn renewal_prompt(subscription: &Subscription, plan: &Plan, lapsed_at: i64, currency: &str) -> String {
    format!(
        r"Write a friendly subscription renewal reminder message.

Customer Wallet: {payer}
Plan: {plan}
Amount: {amount} {currency}
Interval: {interval}
Subscription Expired: {lapsed}
New Period Will End: {next}

Keep it:
- Friendly and professional
- Include payment instructions
- Mention benefits of staying subscribed
- Brief (3-4 sentences)",
        payer = subscription.payer_wallet,
        plan = plan.name,
        amount = to_display_units(plan.amount),
        interval = plan.interval,
        lapsed = format_date(lapsed_at),
        next = format_date(subscription.current_period_end),
    )
}

/// Figures fed into the analytics narrative
pub struct AnalyticsFigures<'a> {
    pub total_revenue: &'a str,
    pub payment_count: usize,
    pub average_payment: &'a str,
    pub active: usize,
    pub payment_required: usize,
    pub canceled: usize,
    pub expired: usize,
    pub total_subscriptions: usize,
    pub recent: &'a [Payment],
}

pub fn analytics_prompt(figures: &AnalyticsFigures<'_>, currency: &str) -> String {
    let recent = if figures.recent.is_empty() {
        "No payments yet".to_string()
    } else {
        figures
            .recent
            .iter()
            .enumerate()
            .map(|(i, p)| {
                format!(
                    "{}. {} {currency} on {}",
                    i + 1,
                    to_display_units(p.amount),
                    format_date(p.timestamp)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r"Create a comprehensive analytics summary for a Web3 subscription merchant:

REVENUE METRICS:
- Total Revenue: {total} {currency}
- Total Payments: {count}
- Average Payment: {average} {currency}

SUBSCRIPTION METRICS:
- Active Subscriptions: {active}
- Awaiting Payment: {payment_required}
- Canceled: {canceled}
- Expired: {expired}
- Total Lifetime Subscriptions: {total_subs}

RECENT ACTIVITY:
{recent}

Provide:
1. Key insights and trends (2-3 bullet points)
2. Actionable recommendations (2-3 bullet points)
3. Overall health assessment
4. Growth suggestions

Keep it concise and actionable. Format with clear sections.",
        total = figures.total_revenue,
        count = figures.payment_count,
        average = figures.average_payment,
        active = figures.active,
        payment_required = figures.payment_required,
        canceled = figures.canceled,
        expired = figures.expired,
        total_subs = figures.total_subscriptions,
    )
}
