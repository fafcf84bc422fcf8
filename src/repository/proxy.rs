use chrono::{DateTime, Duration, Utc};
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use super::TableRecord;
use crate::error::Result;
use crate::filter::{OutcomeConditions, ProxyConditions};
use crate::models::Proxy;

const PROXY_COLUMNS: &str = "p.proxy_url, p.ip, p.port, p.protocol, p.local, p.collect_time";

impl TableRecord for Proxy {
    const TABLE: &'static str = "proxy";
    const COLUMNS: &'static [&'static str] =
        &["proxy_url", "ip", "port", "protocol", "local", "collect_time"];
    const CONFLICT_KEY: Option<&'static str> = Some("proxy_url");

    fn push_row(&self, mut row: Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.proxy_url.clone())
            .push_bind(self.ip.clone())
            .push_bind(i32::from(self.port))
            .push_bind(self.protocol)
            .push_bind(self.local.clone())
            .push_bind(self.collect_time);
    }
}

/// Repository for stored proxies
#[derive(Clone)]
pub struct ProxyRepository {
    pool: PgPool,
}

impl ProxyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Proxies whose stored evidence passes the given conditions
    ///
    /// Same semantics as the in-memory filter chain, evaluated as aggregates
    /// over the `test_log` table.
    pub async fn find_qualified(
        &self,
        proxy_conditions: &ProxyConditions,
        outcome_conditions: &OutcomeConditions,
    ) -> Result<Vec<Proxy>> {
        self.find_qualified_at(proxy_conditions, outcome_conditions, Utc::now())
            .await
    }

    pub async fn find_qualified_at(
        &self,
        proxy_conditions: &ProxyConditions,
        outcome_conditions: &OutcomeConditions,
        now: DateTime<Utc>,
    ) -> Result<Vec<Proxy>> {
        proxy_conditions.validate()?;
        outcome_conditions.validate()?;

        let mut qb = qualified_query(proxy_conditions, outcome_conditions, now);
        let proxies = qb.build_query_as::<Proxy>().fetch_all(&self.pool).await?;

        info!(count = proxies.len(), "Qualified proxies fetched");
        Ok(proxies)
    }

    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM proxy")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// Build the aggregate query behind [`ProxyRepository::find_qualified`]
///
/// Pre-conditions restrict the joined outcomes in `WHERE`; thresholds are
/// checked over the remaining outcomes in `HAVING`. Every value is bound.
pub fn qualified_query(
    proxy_conditions: &ProxyConditions,
    outcome_conditions: &OutcomeConditions,
    now: DateTime<Utc>,
) -> QueryBuilder<'static, Postgres> {
    let with_outcomes = !outcome_conditions.is_empty();

    let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
    qb.push(PROXY_COLUMNS).push(" FROM proxy p");
    if with_outcomes {
        qb.push(" JOIN test_log t ON t.proxy_url = p.proxy_url");
    }
    qb.push(" WHERE 1=1");

    if let Some(ports) = &proxy_conditions.port_list {
        let ports: Vec<i32> = ports.iter().map(|p| i32::from(*p)).collect();
        qb.push(" AND p.port = ANY(").push_bind(ports).push(")");
    }
    if let Some(protocols) = &proxy_conditions.protocol_list {
        let protocols: Vec<String> = protocols.iter().map(|p| p.as_str().to_string()).collect();
        qb.push(" AND p.protocol = ANY(").push_bind(protocols).push(")");
    }
    if let Some(locals) = &proxy_conditions.local_list {
        qb.push(" AND p.local = ANY(").push_bind(locals.clone()).push(")");
    }
    // A window reaching past the earliest representable time places no bound.
    if let Some(cutoff) = cutoff(now, proxy_conditions.collected_within) {
        qb.push(" AND p.collect_time > ").push_bind(cutoff);
    }

    if !with_outcomes {
        qb.push(" ORDER BY p.proxy_url");
        return qb;
    }

    if outcome_conditions.pre_valid_responses {
        qb.push(" AND t.transfer_size > 0");
    }
    if outcome_conditions.pre_verification_ip {
        qb.push(" AND t.verification_ip");
    }
    if let Some(cutoff) = cutoff(now, outcome_conditions.pre_tested_within) {
        qb.push(" AND t.test_time > ").push_bind(cutoff);
    }

    qb.push(" GROUP BY ").push(PROXY_COLUMNS);
    qb.push(" HAVING COUNT(*) > 0");

    if let Some(max) = outcome_conditions.response_elapsed_mean {
        qb.push(
            " AND SUM(CASE WHEN t.response_elapsed > 0 THEN t.response_elapsed ELSE 0 END) / COUNT(*) <= ",
        )
        .push_bind(max);
    }
    if let Some(max) = outcome_conditions.transfer_elapsed_mean {
        qb.push(
            " AND SUM(CASE WHEN t.transfer_elapsed > 0 THEN t.transfer_elapsed ELSE 0 END) / COUNT(*) <= ",
        )
        .push_bind(max);
    }
    if let Some(max) = outcome_conditions.timeout_exception_pr {
        qb.push(" AND AVG(CASE WHEN t.timeout_exception THEN 1.0 ELSE 0.0 END)::float8 <= ")
            .push_bind(max);
    }
    if let Some(max) = outcome_conditions.proxy_exception_pr {
        qb.push(" AND AVG(CASE WHEN t.proxy_exception THEN 1.0 ELSE 0.0 END)::float8 <= ")
            .push_bind(max);
    }
    if let Some(min) = outcome_conditions.valid_responses_pr {
        qb.push(" AND AVG(CASE WHEN t.transfer_size > 0 THEN 1.0 ELSE 0.0 END)::float8 >= ")
            .push_bind(min);
    }

    qb.push(" ORDER BY p.proxy_url");
    qb
}

fn cutoff(now: DateTime<Utc>, window: Option<Duration>) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(window?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyProtocol;
    use crate::repository::insert_query;

    #[test]
    fn test_proxy_upsert_statement() {
        let proxies = vec![
            Proxy::new("1.1.1.1", 80, ProxyProtocol::Http, "home"),
            Proxy::new("2.2.2.2", 81, ProxyProtocol::Https, "home"),
        ];

        let qb = insert_query(&proxies);
        let sql = qb.sql();

        assert!(sql.starts_with(
            "INSERT INTO proxy (proxy_url, ip, port, protocol, local, collect_time) VALUES "
        ));
        assert!(sql.contains("($1, $2, $3, $4, $5, $6), ($7, $8, $9, $10, $11, $12)"));
        assert!(sql.contains("ON CONFLICT (proxy_url) DO UPDATE SET ip = EXCLUDED.ip"));
        assert!(!sql.contains("proxy_url = EXCLUDED.proxy_url"));
    }

    #[test]
    fn test_qualified_query_without_outcome_conditions() {
        let conditions = ProxyConditions {
            port_list: Some(vec![80, 8080]),
            protocol_list: Some(vec![ProxyProtocol::Http]),
            ..Default::default()
        };

        let qb = qualified_query(&conditions, &OutcomeConditions::default(), Utc::now());
        let sql = qb.sql();

        assert!(!sql.contains("test_log"));
        assert!(sql.contains("p.port = ANY($1)"));
        assert!(sql.contains("p.protocol = ANY($2)"));
        assert!(sql.ends_with("ORDER BY p.proxy_url"));
    }

    #[test]
    fn test_qualified_query_with_thresholds() {
        let outcome_conditions = OutcomeConditions {
            response_elapsed_mean: Some(6.0),
            timeout_exception_pr: Some(0.34),
            valid_responses_pr: Some(0.5),
            pre_verification_ip: true,
            pre_tested_within: Some(Duration::hours(1)),
            ..Default::default()
        };
        let proxy_conditions = ProxyConditions {
            local_list: Some(vec!["home".into()]),
            ..Default::default()
        };

        let qb = qualified_query(&proxy_conditions, &outcome_conditions, Utc::now());
        let sql = qb.sql();

        assert!(sql.contains("JOIN test_log t ON t.proxy_url = p.proxy_url"));
        assert!(sql.contains("p.local = ANY($1)"));
        assert!(sql.contains("AND t.verification_ip"));
        assert!(sql.contains("t.test_time > $2"));
        assert!(sql.contains("HAVING COUNT(*) > 0"));
        assert!(sql.contains("/ COUNT(*) <= $3"));
        assert!(sql.contains("THEN 1.0 ELSE 0.0 END)::float8 <= $4"));
        assert!(sql.contains("THEN 1.0 ELSE 0.0 END)::float8 >= $5"));
        assert!(!sql.contains("AND t.transfer_size > 0"));
    }

    #[test]
    fn test_unbounded_windows_place_no_bound() {
        let proxy_conditions = ProxyConditions {
            collected_within: Some(Duration::days(365 * 1_000_000)),
            ..Default::default()
        };
        let outcome_conditions = OutcomeConditions {
            pre_tested_within: Some(Duration::days(365 * 1_000_000)),
            valid_responses_pr: Some(0.5),
            ..Default::default()
        };

        let qb = qualified_query(&proxy_conditions, &outcome_conditions, Utc::now());
        let sql = qb.sql();

        assert!(!sql.contains("p.collect_time >"));
        assert!(!sql.contains("t.test_time >"));
        assert!(sql.contains("::float8 >= $1"));
    }
}
