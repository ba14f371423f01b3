//! Integration tests for partitioned drive calls
//!
//! These run the drive partitioner against the kinematic backend. Because the
//! kinematic model moves each agent independently, a partitioned call must
//! produce exactly what one unbounded call would.

use large_sim_core::kinematic::TIME_STEP;
use large_sim_core::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Grid of agents `spacing` apart, each nudged by a small random offset.
fn jittered_grid(columns: usize, rows: usize, spacing: f64, seed: u64) -> Vec<AgentState> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut states = Vec::with_capacity(columns * rows);
    for row in 0..rows {
        for column in 0..columns {
            states.push(AgentState::new(
                column as f64 * spacing + rng.gen_range(-3.0..3.0),
                row as f64 * spacing + rng.gen_range(-3.0..3.0),
                rng.gen_range(-3.1..3.1),
                rng.gen_range(0.0..15.0),
            ));
        }
    }
    states
}

fn expected_after_step(state: &AgentState) -> AgentState {
    let distance = state.speed * TIME_STEP;
    AgentState::new(
        state.center.x + distance * state.orientation.cos(),
        state.center.y + distance * state.orientation.sin(),
        state.orientation,
        state.speed,
    )
}

fn assert_states_close(actual: &[AgentState], expected: &[AgentState]) {
    assert_eq!(actual.len(), expected.len());
    for (index, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            a.center.distance(e.center) < 1e-9 && a.orientation == e.orientation,
            "agent {index} came back as {a:?}, expected {e:?}"
        );
    }
}

fn partitioner(max_agents: usize) -> (Arc<KinematicModel>, DrivePartitioner) {
    let backend = Arc::new(KinematicModel::new(max_agents));
    let partitioner = DrivePartitioner::new(backend.clone(), PartitionConfig::default());
    (backend, partitioner)
}

#[tokio::test]
async fn test_order_preserved_for_every_call_limit() {
    let states = jittered_grid(12, 10, 40.0, 11);
    let properties = vec![AgentProperties::car(); states.len()];
    let expected: Vec<AgentState> = states.iter().map(expected_after_step).collect();

    for limit in [100, 50, 25, 10] {
        let (backend, partitioner) = partitioner(limit);
        let request = LargeDriveRequest::new("test:grid", states.clone(), properties.clone());
        let response = partitioner.large_drive(request).await.unwrap();

        assert_states_close(&response.agent_states, &expected);
        assert_eq!(response.is_inside_supported_area.len(), states.len());
        assert!(backend.drive_calls() > 1, "limit {limit} should need several calls");
        assert!(backend.largest_call() <= limit);
    }
}

#[tokio::test]
async fn test_single_leaf_matches_direct_call() {
    let states = jittered_grid(5, 4, 40.0, 3);
    let properties = vec![AgentProperties::car(); states.len()];
    let (backend, partitioner) = partitioner(100);

    let request = LargeDriveRequest::new("test:small", states.clone(), properties.clone());
    let partitioned = partitioner.large_drive(request).await.unwrap();
    assert_eq!(backend.drive_calls(), 1);

    let direct = backend
        .drive(DriveRequest {
            location: "test:small".to_string(),
            agent_states: states,
            agent_properties: properties,
            recurrent_states: None,
            light_recurrent_states: None,
            get_infractions: false,
            random_seed: None,
            model_version: None,
        })
        .await
        .unwrap();
    assert_eq!(partitioned, direct);
}

#[tokio::test]
async fn test_concurrent_and_sequential_dispatch_agree() {
    let states = jittered_grid(10, 10, 40.0, 5);
    let properties = vec![AgentProperties::car(); states.len()];
    let (_, partitioner) = partitioner(20);

    let sequential = partitioner
        .large_drive(LargeDriveRequest::new("test:grid", states.clone(), properties.clone()))
        .await
        .unwrap();
    let concurrent = partitioner
        .large_drive(LargeDriveRequest::new("test:grid", states, properties).concurrent(true))
        .await
        .unwrap();
    assert_eq!(sequential, concurrent);
}

#[tokio::test]
async fn test_recurrent_states_follow_their_agents() {
    let mut states = jittered_grid(8, 8, 40.0, 9);
    let properties = vec![AgentProperties::car(); states.len()];
    let mut recurrent: Vec<RecurrentState> = (0..states.len())
        .map(|i| RecurrentState(vec![i as f32 * 100.0]))
        .collect();
    let (_, partitioner) = partitioner(12);

    for step in 1..=5 {
        let request = LargeDriveRequest::new("test:grid", states, properties.clone())
            .with_recurrent_states(recurrent)
            .concurrent(step % 2 == 0);
        let response = partitioner.large_drive(request).await.unwrap();
        for (index, state) in response.recurrent_states.iter().enumerate() {
            assert_eq!(state.0, vec![index as f32 * 100.0 + step as f32]);
        }
        states = response.agent_states;
        recurrent = response.recurrent_states;
    }
}

#[tokio::test]
async fn test_infractions_are_reassembled() {
    let mut states = jittered_grid(6, 6, 40.0, 2);
    // Two agents on top of each other in the far corner.
    states[35] = AgentState::new(states[34].center.x + 0.2, states[34].center.y, 0.0, 0.0);
    states[34].speed = 0.0;
    let properties = vec![AgentProperties::car(); states.len()];
    let (_, partitioner) = partitioner(10);

    let mut request = LargeDriveRequest::new("test:grid", states, properties);
    request.get_infractions = true;
    let response = partitioner.large_drive(request).await.unwrap();

    let infractions = response.infraction_indicators.unwrap();
    assert_eq!(infractions.len(), 36);
    assert!(infractions[34].collisions && infractions[35].collisions);
    assert!(!infractions[0].collisions);
}

#[tokio::test]
async fn test_ego_agent_keeps_index_zero() {
    let backend = Arc::new(KinematicModel::default());
    let config = PartitionConfig::default();
    let initializer = InitializePartitioner::new(backend.clone(), config.clone());
    let driver = DrivePartitioner::new(backend.clone(), config);

    let ego_properties = AgentProperties::new(AgentType::Car, 4.97, 2.04, 1.4, None).unwrap();
    let mut ego = AgentState::new(37.08, -31.78, 1.52, 0.15);

    let mut properties = vec![ego_properties.clone()];
    properties.extend(vec![AgentProperties::car(); 9]);
    let region = Region::new_empty(ego.center, DEFAULT_REGION_SIZE);
    let request = LargeInitializeRequest::new("test:town", vec![region])
        .with_agents(properties, vec![ego])
        .with_seed(17)
        .exact(true);
    let initialized = initializer.large_initialize(request).await.unwrap();

    assert_eq!(initialized.agent_states.len(), 10);
    assert_eq!(initialized.agent_states[0], ego);
    assert_eq!(initialized.agent_properties[0], ego_properties);

    let properties = initialized.agent_properties;
    let mut states = initialized.agent_states;
    let mut recurrent = initialized.recurrent_states;
    for _ in 0..10 {
        let request = LargeDriveRequest::new("test:town", states, properties.clone())
            .with_recurrent_states(recurrent);
        let response = driver.large_drive(request).await.unwrap();

        assert_eq!(response.agent_states.len(), 10);
        assert_states_close(&response.agent_states[..1], &[expected_after_step(&ego)]);

        // The ego is driven externally; its replayed state overrides the model's.
        ego = AgentState::new(ego.center.x, ego.center.y + 0.015, ego.orientation, ego.speed);
        states = response.agent_states;
        states[0] = ego;
        recurrent = response.recurrent_states;
    }
    assert_eq!(properties[0], ego_properties);
    assert_eq!(recurrent[0].0, vec![10.0]);
}

#[tokio::test]
async fn test_rejects_mismatched_request() {
    let (backend, partitioner) = partitioner(100);
    let request = LargeDriveRequest::new(
        "test:grid",
        jittered_grid(2, 2, 40.0, 1),
        vec![AgentProperties::car(); 3],
    );
    let err = partitioner.large_drive(request).await.unwrap_err();
    assert!(err.is_caller_error());
    assert_eq!(backend.drive_calls(), 0);
}
