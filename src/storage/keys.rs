//! Redis key layout. Every prefix here is fixed for on-the-wire
//! compatibility with any existing deployment — never rename one of these
//! without a migration plan.

pub fn meta(queue_id: &str) -> String {
    format!("qm:meta:{queue_id}")
}

pub fn items(queue_id: &str) -> String {
    format!("qm:items:{queue_id}")
}

pub fn item(queue_id: &str, item_id: &str) -> String {
    format!("qm:queue:item:{queue_id}:{item_id}")
}

pub fn scheduled(queue_id: &str) -> String {
    format!("qm:queue:scheduled:{queue_id}")
}

pub fn job(job_id: &str) -> String {
    format!("qm:queue:job:{job_id}")
}

pub fn dependencies(queue_id: &str, item_id: &str) -> String {
    format!("qm:queue:dependencies:{queue_id}:{item_id}")
}

pub fn rate_limit_config(queue_id: &str) -> String {
    format!("qm:queue:rate_limit:{queue_id}")
}

pub fn rate_counters(queue_id: &str) -> String {
    format!("qm:queue:rate_counters:{queue_id}")
}

pub fn execution(queue_id: &str, job_id: &str) -> String {
    format!("qm:queue:execution:{queue_id}:{job_id}")
}

pub fn timeout_tracker(queue_id: &str, job_id: &str) -> String {
    format!("qm:queue:timeout:{queue_id}:{job_id}")
}

pub fn audit_config(queue_id: &str) -> String {
    format!("qm:queue:audit:config:{queue_id}")
}

pub fn audit_log(queue_id: &str, audit_id: &str) -> String {
    format!("qm:queue:audit:log:{queue_id}:{audit_id}")
}

pub fn audit_index(queue_id: &str) -> String {
    format!("qm:queue:audit:index:{queue_id}")
}

pub fn retry_history(queue_id: &str) -> String {
    format!("qm:queue:retry:history:{queue_id}")
}

pub fn retry_job(job_id: &str) -> String {
    format!("qm:queue:retry:job:{job_id}")
}

pub fn schema(queue_id: &str) -> String {
    format!("qm:queue:schema:{queue_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefixes_are_wire_stable() {
        assert_eq!(meta("q1"), "qm:meta:q1");
        assert_eq!(items("q1"), "qm:items:q1");
        assert_eq!(item("q1", "i1"), "qm:queue:item:q1:i1");
        assert_eq!(scheduled("q1"), "qm:queue:scheduled:q1");
        assert_eq!(job("j1"), "qm:queue:job:j1");
        assert_eq!(dependencies("q1", "i1"), "qm:queue:dependencies:q1:i1");
        assert_eq!(rate_limit_config("q1"), "qm:queue:rate_limit:q1");
        assert_eq!(rate_counters("q1"), "qm:queue:rate_counters:q1");
        assert_eq!(execution("q1", "j1"), "qm:queue:execution:q1:j1");
        assert_eq!(timeout_tracker("q1", "j1"), "qm:queue:timeout:q1:j1");
        assert_eq!(audit_config("q1"), "qm:queue:audit:config:q1");
        assert_eq!(audit_log("q1", "a1"), "qm:queue:audit:log:q1:a1");
        assert_eq!(audit_index("q1"), "qm:queue:audit:index:q1");
        assert_eq!(retry_history("q1"), "qm:queue:retry:history:q1");
        assert_eq!(retry_job("j1"), "qm:queue:retry:job:j1");
        assert_eq!(schema("q1"), "qm:queue:schema:q1");
    }
}
