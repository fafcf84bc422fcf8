use sqlx::query_builder::Separated;
use sqlx::Postgres;

use super::TableRecord;
use crate::models::TestOutcome;

impl TableRecord for TestOutcome {
    const TABLE: &'static str = "test_log";
    const COLUMNS: &'static [&'static str] = &[
        "proxy_url",
        "website_name",
        "website_url",
        "response_elapsed",
        "transfer_elapsed",
        "transfer_size",
        "timeout_exception",
        "proxy_exception",
        "test_time",
        "job_time",
        "verification_ip",
        "response_head",
        "response_body",
        "exception",
    ];

    fn push_row(&self, mut row: Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.proxy_url.clone())
            .push_bind(self.website_name.clone())
            .push_bind(self.website_url.clone())
            .push_bind(self.response_elapsed)
            .push_bind(self.transfer_elapsed)
            .push_bind(self.transfer_size)
            .push_bind(self.timeout_exception)
            .push_bind(self.proxy_exception)
            .push_bind(self.test_time)
            .push_bind(self.job_time)
            .push_bind(self.verification_ip)
            .push_bind(self.response_head.clone())
            .push_bind(self.response_body.clone())
            .push_bind(self.exception.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::insert_query;
    use chrono::Utc;

    #[test]
    fn test_outcomes_are_plain_inserts() {
        let outcomes = vec![TestOutcome::pending(
            "http://1.1.1.1:80",
            "ip138.com",
            "http://202020.ip138.com/",
            Utc::now(),
            true,
        )];

        let qb = insert_query(&outcomes);
        let sql = qb.sql();

        assert!(sql.starts_with("INSERT INTO test_log (proxy_url, website_name, "));
        assert!(sql.contains("$14)"));
        assert!(!sql.contains("$15"));
        assert!(!sql.contains("ON CONFLICT"));
    }
}
