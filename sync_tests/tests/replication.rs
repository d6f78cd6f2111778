//! End-to-end replication through a real relay over TCP.

use std::time::Duration;

use sync_client::{avatar::SharedAvatar, session::Routed};
use sync_shared::{
    math::{Quat, Vec3},
    net::ParticipantId,
    persist::SnapshotStore,
};
use sync_tests::{init_tracing, temp_store_path, Participant, RunningRelay};

const INTERVAL: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(3);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn observer_receives_owner_updates() -> anyhow::Result<()> {
    init_tracing();
    let relay = RunningRelay::start(None).await?;

    let spot = Vec3::new(3.0, 4.0, 0.0);
    let mut owner = Participant::join(
        &relay.participant_cfg(1, INTERVAL),
        SharedAvatar::new(spot, Quat::from_yaw(0.5)),
    )
    .await?;
    assert!(owner.session.activate().await);

    let mut observer = Participant::join(
        &relay.participant_cfg(2, INTERVAL),
        SharedAvatar::new(Vec3::ZERO, Quat::IDENTITY),
    )
    .await?;

    observer
        .pump_until(WAIT, |r| r == Routed::Remote(ParticipantId(1)))
        .await?;
    let seen = observer
        .session
        .remote_state(ParticipantId(1))
        .await
        .expect("remote view exists");
    assert_eq!(seen.position, spot);

    // Observer's own player is not sampled (never activated), and the
    // owner's view of the observer stays empty.
    let routed = owner.pump_for(Duration::from_millis(200)).await;
    assert!(routed.iter().all(|r| *r != Routed::Remote(ParticipantId(2))));

    owner.leave().await?;
    observer.leave().await?;
    relay.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn airborne_owner_publishes_nothing_until_it_lands() -> anyhow::Result<()> {
    init_tracing();
    let relay = RunningRelay::start(None).await?;

    let avatar = SharedAvatar::new(Vec3::new(1.0, 1.0, 2.0), Quat::IDENTITY);
    avatar.set_grounded(false);
    let mut owner = Participant::join(&relay.participant_cfg(1, INTERVAL), avatar.clone()).await?;
    owner.session.activate().await;

    let mut observer = Participant::join(
        &relay.participant_cfg(2, INTERVAL),
        SharedAvatar::new(Vec3::ZERO, Quat::IDENTITY),
    )
    .await?;

    let routed = observer.pump_for(Duration::from_millis(300)).await;
    assert!(routed.is_empty(), "nothing replicated while airborne: {routed:?}");
    assert_eq!(observer.session.remote_count(), 0);

    avatar.set_position(Vec3::new(1.0, 1.0, 0.0));
    avatar.set_grounded(true);
    observer
        .pump_until(WAIT, |r| r == Routed::Remote(ParticipantId(1)))
        .await?;
    let seen = observer.session.remote_state(ParticipantId(1)).await;
    assert_eq!(seen.map(|s| s.position), Some(Vec3::new(1.0, 1.0, 0.0)));

    owner.leave().await?;
    observer.leave().await?;
    relay.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejoining_participant_is_restored_and_store_persists() -> anyhow::Result<()> {
    init_tracing();
    let (_scratch, store_path) = temp_store_path()?;
    let relay = RunningRelay::start(Some(store_path.clone())).await?;

    let spot = Vec3::new(-12.0, 6.5, 0.0);
    let facing = Quat::from_yaw(2.0);
    let mut first = Participant::join(
        &relay.participant_cfg(7, INTERVAL),
        SharedAvatar::new(spot, facing),
    )
    .await?;
    // Nothing stored yet for a first-time participant.
    let restored = first
        .link
        .await_restore(&mut first.session, Duration::from_millis(200))
        .await;
    assert!(!restored);
    first.session.activate().await;

    // Once an observer has the sample, the relay has stored it too.
    let mut observer = Participant::join(
        &relay.participant_cfg(8, INTERVAL),
        SharedAvatar::new(Vec3::ZERO, Quat::IDENTITY),
    )
    .await?;
    observer
        .pump_until(WAIT, |r| r == Routed::Remote(ParticipantId(7)))
        .await?;
    first.leave().await?;

    // Fresh process, fresh avatar at the origin.
    let mut again = Participant::join(
        &relay.participant_cfg(7, INTERVAL),
        SharedAvatar::new(Vec3::ZERO, Quat::IDENTITY),
    )
    .await?;
    assert!(again.link.await_restore(&mut again.session, WAIT).await);

    let restored = again.avatar.snapshot();
    assert_eq!(restored.position, spot);
    assert_eq!(restored.teleports, 1);
    assert!((restored.orientation.w - facing.w).abs() < 1e-6);

    // Sampling after the restore continues from the restored sequence.
    let restored_seq = again.session.local().replicator().lock().await.seq();
    assert!(restored_seq >= 1);
    assert!(again.session.activate().await);

    again.leave().await?;
    observer.leave().await?;
    let server = relay.stop().await?;
    assert!(server.store().get(ParticipantId(7)).is_some());

    let on_disk = SnapshotStore::load(&store_path)?;
    let stored = on_disk.get(ParticipantId(7)).expect("snapshot persisted");
    assert_eq!(stored.state.position, spot);
    assert!(on_disk.get(ParticipantId(8)).is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn departed_player_view_is_dropped() -> anyhow::Result<()> {
    init_tracing();
    let relay = RunningRelay::start(None).await?;

    let mut owner = Participant::join(
        &relay.participant_cfg(1, INTERVAL),
        SharedAvatar::new(Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY),
    )
    .await?;
    owner.session.activate().await;

    let mut observer = Participant::join(
        &relay.participant_cfg(2, INTERVAL),
        SharedAvatar::new(Vec3::ZERO, Quat::IDENTITY),
    )
    .await?;
    observer
        .pump_until(WAIT, |r| r == Routed::Remote(ParticipantId(1)))
        .await?;
    assert_eq!(observer.session.remote_count(), 1);

    owner.leave().await?;
    observer
        .pump_until(WAIT, |r| r == Routed::Departed(ParticipantId(1)))
        .await?;
    assert_eq!(observer.session.remote_count(), 0);

    observer.leave().await?;
    relay.stop().await?;
    Ok(())
}
