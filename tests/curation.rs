use proptest::prelude::*;
use spikeview::{
    canvas::FrameOutcome,
    cluster::{ClusterId, LabelField, SpikeId},
    command::CommandKind,
    headless::HeadlessDevice,
    history::ChangeCause,
    Session, SessionConfig, SpikeData,
};

fn session(assignments: &[u32]) -> Session<HeadlessDevice> {
    let n = assignments.len();
    let spikes = SpikeData::new(
        (0..n).map(|i| i as f64 * 0.01).collect::<Vec<_>>(),
        (0..n).map(|i| 1.0 + (i % 5) as f32).collect::<Vec<_>>(),
    )
    .unwrap();
    Session::new(
        HeadlessDevice::new(),
        400,
        300,
        assignments,
        spikes,
        SessionConfig::default(),
    )
    .unwrap()
}

fn spike_ids(ids: &[u32]) -> Vec<SpikeId> {
    ids.iter().copied().map(SpikeId).collect()
}

#[test]
fn merge_and_undo_of_two_clusters() {
    // Cluster 3 = {1, 2}, cluster 7 = {5}.
    let mut session = session(&[0, 3, 3, 0, 0, 7]);
    let changes = session.subscribe();

    let merged = session.merge(&[ClusterId(3), ClusterId(7)]).unwrap();
    assert_eq!(merged, ClusterId(8));
    assert_eq!(session.state().spikes(merged).unwrap(), &spike_ids(&[1, 2, 5])[..]);

    let change = changes.try_recv().unwrap();
    assert_eq!(change.cause, ChangeCause::Execute(CommandKind::Merge));
    assert_eq!(change.removed, vec![ClusterId(3), ClusterId(7)]);

    session.undo().unwrap();
    assert_eq!(session.state().spikes(ClusterId(3)).unwrap(), &spike_ids(&[1, 2])[..]);
    assert_eq!(session.state().spikes(ClusterId(7)).unwrap(), &spike_ids(&[5])[..]);
    assert!(!session.state().is_live(merged));
}

#[test]
fn redone_splits_reuse_their_ids() {
    let mut session = session(&[0, 3, 3, 3, 3]);
    let created = session.split(ClusterId(3), &spike_ids(&[1, 2])).unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(session.state().spikes(created[0]).unwrap(), &spike_ids(&[1, 2])[..]);
    assert_eq!(session.state().spikes(created[1]).unwrap(), &spike_ids(&[3, 4])[..]);

    session.undo().unwrap();
    assert!(session.state().is_live(ClusterId(3)));
    let redone = session.redo().unwrap();
    assert_eq!(redone.added, created);
}

#[test]
fn labels_are_undoable() {
    let mut session = session(&[0, 1]);
    session
        .label(&[ClusterId(1)], LabelField::Quality, Some("good"))
        .unwrap();
    let metadata = session.state().metadata(ClusterId(1)).unwrap();
    assert_eq!(metadata.quality.as_deref(), Some("good"));

    session.undo().unwrap();
    assert_eq!(session.state().metadata(ClusterId(1)).unwrap().quality, None);
}

#[test]
fn selected_clusters_are_drawn() {
    let mut session = session(&[0, 0, 1, 1, 2]);
    session.select([ClusterId(0), ClusterId(2)]);

    let FrameOutcome::Drawn(stats) = session.frame() else {
        panic!("a new selection should produce a frame");
    };
    assert!(stats.draws > 0);
    assert_eq!(session.canvas().device().frames(), 1);

    // A merge of a selected cluster replaces it in the selection.
    let merged = session.merge(&[ClusterId(0), ClusterId(1)]).unwrap();
    assert!(matches!(session.frame(), FrameOutcome::Drawn(_)));
    assert!(session.selection().contains(&merged));
    assert!(!session.selection().contains(&ClusterId(0)));
}

#[test]
fn invalid_requests_leave_the_session_untouched() {
    let mut session = session(&[0, 1]);
    assert!(session.merge(&[ClusterId(0), ClusterId(9)]).is_err());
    assert!(session.split(ClusterId(0), &spike_ids(&[1])).is_err());
    assert!(!session.history().can_undo());
    assert_eq!(session.state().n_clusters(), 2);
}

proptest! {
    #[test]
    fn merging_the_children_of_a_split_restores_the_grouping(
        assignments in proptest::collection::vec(0u32..4, 2..50),
        pick in 0usize..16,
        cut in 1usize..64,
    ) {
        let mut session = session(&assignments);
        let clusters = session.state().cluster_ids().collect::<Vec<_>>();
        let cluster = clusters[pick % clusters.len()];
        let members = session.state().spikes(cluster).unwrap().to_vec();
        prop_assume!(members.len() >= 2);
        let subset = &members[..1 + cut % (members.len() - 1)];

        let children = session.split(cluster, subset).unwrap();
        let merged = session.merge(&children).unwrap();

        prop_assert_eq!(session.state().spikes(merged).unwrap(), &members[..]);
        for other in clusters.iter().filter(|c| **c != cluster) {
            prop_assert!(session.state().is_live(*other));
        }
    }
}
