//! End-to-end scenarios, spec §8.

use cascade_rs::combinators::aggregate::{batch, distinct, distinct_by_value, scan, window};
use cascade_rs::combinators::error_handling::catch_and_continue;
use cascade_rs::combinators::temporal::timeout;
use cascade_rs::combinators::transform::{filter, map};
use cascade_rs::error::FlowError;
use cascade_rs::stream::{boxed, FlowStream};
use futures::stream;

fn ints(xs: Vec<i32>) -> FlowStream<'static, i32> {
    boxed(stream::iter(xs.into_iter().map(Ok)))
}

#[tokio::test]
async fn scenario_a_map_then_filter() {
    let pipeline = map(|x: i32| x + 1).then(&filter(|x: &i32| x % 2 == 0));
    let out = pipeline
        .to_list(ints(vec![0, 1, 2, 3, 4]))
        .await
        .unwrap();
    assert_eq!(out, vec![2, 4]);
}

#[tokio::test]
async fn scenario_b_batch() {
    let flow = batch::<i32>(3).unwrap();
    let out = flow.to_list(ints(vec![1, 2, 3, 4, 5, 6])).await.unwrap();
    assert_eq!(out, vec![vec![1, 2, 3], vec![4, 5, 6]]);

    let out2 = flow
        .to_list(ints(vec![1, 2, 3, 4, 5, 6, 7]))
        .await
        .unwrap();
    assert_eq!(out2, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
}

#[tokio::test]
async fn scenario_c_scan() {
    let flow = scan(|acc: i32, x: i32| acc + x, 0);
    let out = flow.to_list(ints(vec![1, 2, 3, 4])).await.unwrap();
    assert_eq!(out, vec![0, 1, 3, 6, 10]);
}

#[tokio::test]
async fn scenario_d_distinct() {
    let flow = distinct_by_value::<i32>();
    let out = flow
        .to_list(ints(vec![1, 1, 2, 3, 3, 3, 4]))
        .await
        .unwrap();
    assert_eq!(out, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn scenario_e_distinct_by_key() {
    let words: FlowStream<'static, &'static str> =
        boxed(stream::iter(vec!["a", "bb", "c", "dd", "eee"].into_iter().map(Ok)));
    let flow = distinct(|s: &&'static str| s.len());
    let out = flow.to_list(words).await.unwrap();
    assert_eq!(out, vec!["a", "bb", "eee"]);
}

#[tokio::test]
async fn scenario_f_sliding_window() {
    let flow = window::<i32>(3, 2).unwrap();
    let out = flow.to_list(ints((0..10).collect())).await.unwrap();
    assert_eq!(
        out,
        vec![
            vec![0, 1, 2],
            vec![2, 3, 4],
            vec![4, 5, 6],
            vec![6, 7, 8],
        ]
    );
}

#[tokio::test]
async fn scenario_g_catch_and_continue_recovers_offending_item() {
    let flow = catch_and_continue(
        |x: i32| async move {
            if x == 3 {
                Err(FlowError::execution("test", "boom"))
            } else {
                Ok(x)
            }
        },
        |x: i32, _e| Some(x),
    );
    let out = flow.to_list(ints(vec![1, 2, 3, 4])).await.unwrap();
    assert_eq!(out, vec![1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn scenario_h_timeout_after_stall() {
    let flow = timeout::<i32>(0.01);
    let stalling: FlowStream<'static, i32> = boxed(async_stream::stream! {
        yield Ok(1);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        yield Ok(2);
    });
    let mut out = flow.apply(stalling);
    use futures::StreamExt;
    assert_eq!(out.next().await.unwrap().unwrap(), 1);
    let err = out.next().await.unwrap().unwrap_err();
    assert!(matches!(err, FlowError::Timeout { .. }));
}
