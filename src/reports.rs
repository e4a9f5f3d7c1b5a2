// 📊 Reporting - pure aggregations over a session snapshot
//
// Every function here takes the stored list (newest first) and derives a
// view model. Nothing is cached and nothing is mutated.

use crate::models::{ReconcileSession, ReconciledTransaction};
use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;

const MONTHS_PT_BR: [&str; 12] = [
    "jan", "fev", "mar", "abr", "mai", "jun", "jul", "ago", "set", "out", "nov", "dez",
];

// ============================================================================
// VIEW MODELS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardTotals {
    pub total_amount: f64,
    pub transaction_count: usize,
    /// Finalization date of the newest session, None when nothing is saved
    pub last_session: Option<DateTime<Utc>>,
}

/// One point of a chart series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodTotal {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub value: f64,
}

/// A session restricted to the transactions matching a search
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMatch {
    #[serde(flatten)]
    pub session: ReconcileSession,
    pub matching_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub monthly: Vec<PeriodTotal>,
    pub daily: Vec<PeriodTotal>,
    pub categories: Vec<CategoryTotal>,
    pub top_category: Option<CategoryTotal>,
    pub average_ticket: f64,
}

// ============================================================================
// AGGREGATIONS
// ============================================================================

pub fn dashboard_totals(sessions: &[ReconcileSession]) -> DashboardTotals {
    DashboardTotals {
        total_amount: sessions.iter().map(|s| s.total_amount).sum(),
        transaction_count: sessions.iter().map(|s| s.transaction_count()).sum(),
        last_session: sessions.first().map(|s| s.date),
    }
}

/// The `limit` newest sessions
pub fn recent_sessions(sessions: &[ReconcileSession], limit: usize) -> &[ReconcileSession] {
    &sessions[..sessions.len().min(limit)]
}

/// Human label for a calendar month, e.g. "mar/2025"
pub fn month_label<Tz: TimeZone>(date: &DateTime<Tz>) -> String {
    format!("{}/{}", MONTHS_PT_BR[date.month0() as usize], date.year())
}

/// Sum of session totals per calendar month of finalization, in the
/// machine's local time zone.
pub fn monthly_totals(sessions: &[ReconcileSession]) -> Vec<PeriodTotal> {
    monthly_totals_in(sessions, &Local)
}

/// `monthly_totals` with the month boundaries of `tz`.
///
/// Months appear in first-seen order while scanning newest first, then the
/// list is reversed so the oldest month comes first.
pub fn monthly_totals_in<Tz: TimeZone>(sessions: &[ReconcileSession], tz: &Tz) -> Vec<PeriodTotal> {
    let mut months: Vec<PeriodTotal> = Vec::new();

    for session in sessions {
        let label = month_label(&session.date.with_timezone(tz));
        match months.iter_mut().find(|m| m.name == label) {
            Some(month) => month.value += session.total_amount,
            None => months.push(PeriodTotal {
                name: label,
                value: session.total_amount,
            }),
        }
    }

    months.reverse();
    months
}

/// Sum of amounts per raw statement date string.
///
/// Sorted by the raw string, which is lexicographic and not calendar order
/// unless the bank prints ISO dates.
pub fn daily_totals(sessions: &[ReconcileSession]) -> Vec<PeriodTotal> {
    let mut days: HashMap<&str, f64> = HashMap::new();

    for tx in all_transactions(sessions) {
        *days.entry(tx.date()).or_insert(0.0) += tx.amount();
    }

    let mut result: Vec<PeriodTotal> = days
        .into_iter()
        .map(|(name, value)| PeriodTotal {
            name: name.to_string(),
            value,
        })
        .collect();

    result.sort_by(|a, b| a.name.cmp(&b.name));
    result
}

/// Sum of amounts per category, largest first
pub fn category_totals(sessions: &[ReconcileSession]) -> Vec<CategoryTotal> {
    let mut categories: HashMap<&str, f64> = HashMap::new();

    for tx in all_transactions(sessions) {
        *categories.entry(tx.category.as_str()).or_insert(0.0) += tx.amount();
    }

    let mut result: Vec<CategoryTotal> = categories
        .into_iter()
        .map(|(category, value)| CategoryTotal {
            category: category.to_string(),
            value,
        })
        .collect();

    // Ties broken by name so the "top category" is stable
    result.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.category.cmp(&b.category)));
    result
}

pub fn top_category(sessions: &[ReconcileSession]) -> Option<CategoryTotal> {
    category_totals(sessions).into_iter().next()
}

/// Mean amount per reconciled transaction (0 when there are none)
pub fn average_ticket(sessions: &[ReconcileSession]) -> f64 {
    let totals = dashboard_totals(sessions);
    if totals.transaction_count == 0 {
        return 0.0;
    }
    totals.total_amount / totals.transaction_count as f64
}

pub fn report_summary(sessions: &[ReconcileSession]) -> ReportSummary {
    let categories = category_totals(sessions);
    ReportSummary {
        monthly: monthly_totals(sessions),
        daily: daily_totals(sessions),
        top_category: categories.first().cloned(),
        categories,
        average_ticket: average_ticket(sessions),
    }
}

/// Case-insensitive search over payer, category, description, patient and
/// email. Sessions without a match are dropped; survivors carry only their
/// matching transactions.
pub fn search_sessions(sessions: &[ReconcileSession], query: &str) -> Vec<SessionMatch> {
    let query = query.trim().to_lowercase();

    sessions
        .iter()
        .filter_map(|session| {
            let matching: Vec<ReconciledTransaction> = session
                .transactions
                .iter()
                .filter(|tx| matches_query(tx, &query))
                .cloned()
                .collect();

            if matching.is_empty() {
                return None;
            }

            Some(SessionMatch {
                matching_count: matching.len(),
                session: ReconcileSession {
                    transactions: matching,
                    ..session.clone()
                },
            })
        })
        .collect()
}

fn matches_query(tx: &ReconciledTransaction, query: &str) -> bool {
    [
        tx.payer_name.as_str(),
        tx.category.as_str(),
        tx.description(),
        tx.patient_name.as_str(),
        tx.email.as_str(),
    ]
    .iter()
    .any(|field| field.to_lowercase().contains(query))
}

fn all_transactions(sessions: &[ReconcileSession]) -> impl Iterator<Item = &ReconciledTransaction> {
    sessions.iter().flat_map(|s| s.transactions.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Annotation, Transaction};
    use chrono::{FixedOffset, TimeZone};

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 15, 30, 0).unwrap()
    }

    fn reconciled(date: &str, amount: f64, payer: &str, category: &str, when: DateTime<Utc>) -> ReconciledTransaction {
        let annotation = Annotation {
            payer_name: payer.to_string(),
            category: category.to_string(),
            ..Default::default()
        };
        ReconciledTransaction::from_annotation(Transaction::credit(date, "PIX RECEBIDO", amount), &annotation, when)
    }

    /// Newest first, like the store
    fn jan_feb_sessions() -> Vec<ReconcileSession> {
        let jan = at(2025, 1, 20);
        let feb = at(2025, 2, 10);
        vec![
            ReconcileSession::new(
                vec![
                    reconciled("05/02", 150.0, "Ana Silva", "Consulta", feb),
                    reconciled("06/02", 50.0, "Bruno", "Estética", feb),
                ],
                feb,
            ),
            ReconcileSession::new(vec![reconciled("18/01", 100.0, "Carla", "Consulta", jan)], jan),
        ]
    }

    #[test]
    fn test_dashboard_totals() {
        let sessions = jan_feb_sessions();

        let totals = dashboard_totals(&sessions);

        assert_eq!(totals.total_amount, 300.0);
        assert_eq!(totals.transaction_count, 3);
        assert_eq!(totals.last_session, Some(at(2025, 2, 10)));
    }

    #[test]
    fn test_dashboard_totals_empty() {
        let totals = dashboard_totals(&[]);

        assert_eq!(totals.total_amount, 0.0);
        assert_eq!(totals.transaction_count, 0);
        assert_eq!(totals.last_session, None);
    }

    #[test]
    fn test_monthly_totals_chronological() {
        let sessions = jan_feb_sessions();

        let monthly = monthly_totals(&sessions);

        assert_eq!(
            monthly,
            vec![
                PeriodTotal { name: "jan/2025".to_string(), value: 100.0 },
                PeriodTotal { name: "fev/2025".to_string(), value: 200.0 },
            ]
        );
    }

    #[test]
    fn test_monthly_totals_merges_same_month() {
        let mut sessions = jan_feb_sessions();
        let late_feb = at(2025, 2, 25);
        sessions.insert(0, ReconcileSession::new(vec![reconciled("24/02", 25.0, "Ana", "Consulta", late_feb)], late_feb));

        let monthly = monthly_totals(&sessions);

        assert_eq!(monthly.len(), 2);
        assert_eq!(monthly[1].value, 225.0);
    }

    #[test]
    fn test_monthly_totals_use_local_month_boundaries() {
        let sao_paulo = FixedOffset::west_opt(3 * 3600).unwrap();
        // 31 Jan 23:30 at the clinic is already 1 Feb in UTC
        let late_jan = sao_paulo
            .with_ymd_and_hms(2025, 1, 31, 23, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        let sessions = vec![ReconcileSession::new(
            vec![reconciled("31/01", 100.0, "Ana", "Consulta", late_jan)],
            late_jan,
        )];

        assert_eq!(
            monthly_totals_in(&sessions, &sao_paulo),
            vec![PeriodTotal { name: "jan/2025".to_string(), value: 100.0 }]
        );
        assert_eq!(monthly_totals_in(&sessions, &Utc)[0].name, "fev/2025");
    }

    #[test]
    fn test_monthly_totals_keeps_years_apart() {
        let jan_2024 = at(2024, 1, 5);
        let jan_2025 = at(2025, 1, 5);
        let sessions = vec![
            ReconcileSession::new(vec![reconciled("05/01", 10.0, "A", "Consulta", jan_2025)], jan_2025),
            ReconcileSession::new(vec![reconciled("05/01", 20.0, "A", "Consulta", jan_2024)], jan_2024),
        ];

        let monthly = monthly_totals(&sessions);

        assert_eq!(monthly[0].name, "jan/2024");
        assert_eq!(monthly[1].name, "jan/2025");
    }

    #[test]
    fn test_daily_totals_raw_string_order() {
        let when = at(2025, 3, 1);
        let sessions = vec![ReconcileSession::new(
            vec![
                reconciled("10/01", 5.0, "A", "Consulta", when),
                reconciled("02/02", 7.0, "B", "Consulta", when),
                reconciled("10/01", 3.0, "C", "Consulta", when),
            ],
            when,
        )];

        let daily = daily_totals(&sessions);

        // "02/02" sorts before "10/01" even though January comes first
        assert_eq!(daily[0], PeriodTotal { name: "02/02".to_string(), value: 7.0 });
        assert_eq!(daily[1], PeriodTotal { name: "10/01".to_string(), value: 8.0 });
    }

    #[test]
    fn test_category_totals_descending_with_top() {
        let sessions = jan_feb_sessions();

        let categories = category_totals(&sessions);

        assert_eq!(categories[0].category, "Consulta");
        assert_eq!(categories[0].value, 250.0);
        assert_eq!(categories[1].category, "Estética");
        assert_eq!(top_category(&sessions).unwrap().category, "Consulta");
        assert!(top_category(&[]).is_none());
    }

    #[test]
    fn test_average_ticket() {
        assert_eq!(average_ticket(&jan_feb_sessions()), 100.0);
        assert_eq!(average_ticket(&[]), 0.0);
    }

    #[test]
    fn test_search_drops_sessions_without_matches() {
        let sessions = jan_feb_sessions();

        let hits = search_sessions(&sessions, "ANA");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].matching_count, 1);
        assert_eq!(hits[0].session.transactions[0].payer_name, "Ana Silva");
        // the projection keeps the stored total
        assert_eq!(hits[0].session.total_amount, 200.0);
        // stored data untouched
        assert_eq!(sessions[0].transactions.len(), 2);
    }

    #[test]
    fn test_search_never_returns_empty_matches() {
        let sessions = jan_feb_sessions();

        for query in ["consulta", "pix", "zzz", "", "bruno"] {
            for hit in search_sessions(&sessions, query) {
                assert!(hit.matching_count > 0);
                assert_eq!(hit.matching_count, hit.session.transactions.len());
            }
        }
        assert!(search_sessions(&sessions, "zzz").is_empty());
    }

    #[test]
    fn test_search_matches_patient_and_email() {
        let when = at(2025, 4, 1);
        let mut tx = reconciled("01/04", 90.0, "Pai da Julia", "Consulta", when);
        tx.patient_name = "Julia Rocha".to_string();
        tx.email = "familia@rocha.com".to_string();
        let sessions = vec![ReconcileSession::new(vec![tx], when)];

        assert_eq!(search_sessions(&sessions, "rocha").len(), 1);
        assert_eq!(search_sessions(&sessions, "FAMILIA@").len(), 1);
    }

    #[test]
    fn test_search_match_serializes_matching_count() {
        let hits = search_sessions(&jan_feb_sessions(), "carla");

        let json = serde_json::to_value(&hits[0]).unwrap();

        assert_eq!(json["matchingCount"], 1);
        assert_eq!(json["totalAmount"], 100.0);
    }

    #[test]
    fn test_recent_sessions_limit() {
        let sessions = jan_feb_sessions();

        assert_eq!(recent_sessions(&sessions, 5).len(), 2);
        assert_eq!(recent_sessions(&sessions, 1)[0].id, sessions[0].id);
    }
}
