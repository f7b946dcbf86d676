use runs_api::url::{join_segments, normalize_base_url, BULK_RUNS_SEGMENTS};

#[test]
fn bulk_endpoint_resolves_under_base_path() {
    let base = normalize_base_url("https://runs.example.test/api/v1/").expect("base");
    let url = join_segments(&base, &BULK_RUNS_SEGMENTS).expect("joined");
    assert_eq!(url.as_str(), "https://runs.example.test/api/v1/runs/bulk");
}

#[test]
fn batch_ids_are_percent_encoded() {
    let base = normalize_base_url("https://runs.example.test").expect("base");
    let url = join_segments(&base, &["runs", "bulk", "a?b#c"]).expect("joined");
    assert_eq!(url.as_str(), "https://runs.example.test/runs/bulk/a%3Fb%23c");
}
