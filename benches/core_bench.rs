//! Benchmarks for stratus core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use stratus::core::{hasher, parser, planner};
use stratus::resources::instance_refresh::RefreshInfo;
use stratus::waiter::Classify;

const CONFIG: &str = r#"
version: "1.0"
name: bench-stack
provider:
  region: us-west-2
resources:
  pods:
    type: aws_eks_fargate_profile
    cluster_name: prod
    fargate_profile_name: default
    pod_execution_role_arn: arn:aws:iam::123456789012:role/pods
    subnet_ids: [subnet-1, subnet-2]
    selector:
      - namespace: default
        labels:
          tier: web
    tags:
      env: prod
  build:
    type: aws_codebuild_project
    name: app-build
    service_role: arn:aws:iam::123456789012:role/build
    source:
      type: GITHUB
      location: https://github.com/example/app.git
    artifacts:
      type: NO_ARTIFACTS
    environment:
      type: LINUX_CONTAINER
      image: aws/codebuild/standard:7.0
      compute_type: BUILD_GENERAL1_SMALL
  grant:
    type: aws_redshift_snapshot_copy_grant
    snapshot_copy_grant_name: dr-grant
"#;

fn bench_blake3_string(c: &mut Criterion) {
    let mut group = c.benchmark_group("blake3_string");
    for size in [64, 256, 1024, 4096] {
        let input: String = "x".repeat(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(hasher::hash_string(black_box(input))));
        });
    }
    group.finish();
}

fn bench_parse_config(c: &mut Criterion) {
    c.bench_function("parse_config", |b| {
        b.iter(|| {
            let config = parser::parse_config(black_box(CONFIG)).unwrap();
            black_box(parser::validate_config(&config));
        });
    });
}

fn bench_hash_desired(c: &mut Criterion) {
    let config = parser::parse_config(CONFIG).unwrap();
    c.bench_function("desired_state", |b| {
        b.iter(|| {
            for decl in config.resources.values() {
                black_box(planner::desired_state(black_box(decl)));
            }
        });
    });
}

fn bench_plan(c: &mut Criterion) {
    let config = parser::parse_config(CONFIG).unwrap();
    c.bench_function("plan_no_lock", |b| {
        b.iter(|| black_box(planner::plan(black_box(&config), None)));
    });
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify_refresh");
    for status in ["InProgress", "Successful", "RollbackSuccessful", "Warming"] {
        let info: RefreshInfo = serde_json::from_value(json!({
            "InstanceRefreshId": "r-1",
            "AutoScalingGroupName": "asg",
            "Status": status,
            "StatusReason": "bench"
        }))
        .unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(status), &info, |b, info| {
            b.iter(|| black_box(black_box(info).classify()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_blake3_string,
    bench_parse_config,
    bench_hash_desired,
    bench_plan,
    bench_classify
);
criterion_main!(benches);
