//! Integration tests for the LLM reviewer.
//!
//! These tests make real API calls to OpenRouter.
//! Run with: OPENROUTER_API_KEY=your_key cargo test --test review_integration -- --ignored

use std::fs;

use tempfile::TempDir;

use langbench::review::{LlmReviewer, ReviewRequest, Reviewer};

fn get_test_api_key() -> String {
    std::env::var("OPENROUTER_API_KEY")
        .expect("OPENROUTER_API_KEY environment variable must be set for integration tests")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test review_integration -- --ignored
async fn test_review_of_small_solution() {
    let reviewer = LlmReviewer::new(get_test_api_key()).expect("Should build client");

    let workspace = TempDir::new().expect("Should create temp dir");
    fs::write(
        workspace.path().join("solve.py"),
        "a, b = map(int, input().split())\nprint(a + b)\n",
    )
    .expect("Should write solution");

    let review = reviewer
        .review(&ReviewRequest {
            workspace: workspace.path().to_path_buf(),
            spec: "Read two integers from stdin and print their sum.".to_string(),
            rubric: "Correctness and clarity.".to_string(),
            scaffold: None,
        })
        .await;
    assert!(review.is_ok(), "Review failed: {:?}", review.err());

    let review = review.expect("Should have review");
    assert!(review.score <= 100);
    assert!(!review.review.is_empty(), "Review text should not be empty");
}
