//! Segments shared with separate helper processes.

#![allow(clippy::expect_used)]

mod common;

use std::process::Child;
use std::time::Duration;

use common::{create_or_skip, fill_pattern, helper, is_destroyed, unique_key, wait_for_attach_count};
use pretty_assertions::assert_eq;
use shmseg::{Removal, SegmentHandle};

const SIZE: usize = 8192;
const HELPERS: usize = 8;
const ATTACH_TIMEOUT: Duration = Duration::from_secs(20);

fn spawn_sleepers(key: shmseg::Key, size: usize, count: usize) -> Vec<Child> {
    (0..count)
        .map(|_| {
            helper("sleep", key, size)
                .args(["--secs", "60"])
                .spawn()
                .expect("spawn helper")
        })
        .collect()
}

#[test]
fn test_same_data_multi_process() {
    let (_file, key) = unique_key(1);
    let Some(mut segment) = create_or_skip(key, SIZE) else {
        return;
    };
    segment.attach().expect("attach");
    fill_pattern(segment.as_mut_slice().expect("view"));

    let status = helper("get-same", key, SIZE).status().expect("run helper");
    assert!(status.success(), "helper failed: {status}");

    // The helper requested removal; our attachment keeps the data alive.
    let stat = segment.stat().expect("stat");
    assert_eq!(stat.attach_count, 1);
    #[cfg(target_os = "linux")]
    assert!(stat.marked_for_removal);
    assert_eq!(segment.as_slice().expect("view")[255], 255);

    segment.detach().expect("detach");
    assert!(is_destroyed(&segment));
    assert_eq!(segment.remove().expect("remove"), Removal::AlreadyGone);
}

#[test]
fn test_helper_rejects_mismatched_content() {
    let (_file, key) = unique_key(2);
    let Some(mut segment) = create_or_skip(key, SIZE) else {
        return;
    };
    segment.attach().expect("attach");
    fill_pattern(segment.as_mut_slice().expect("view"));
    segment.as_mut_slice().expect("view")[4000] ^= 0xff;

    let status = helper("get-same", key, SIZE).status().expect("run helper");
    assert!(!status.success());

    // Failed verification must not remove the segment.
    let stat = segment.stat().expect("stat");
    assert_eq!(stat.attach_count, 1);
    assert!(!stat.marked_for_removal);

    segment.attach_and_remove().expect("remove");
    segment.detach().expect("detach");
    assert!(is_destroyed(&segment));
}

#[test]
fn test_detach_only_helpers_leave_segment() {
    let size = 1 << 16;
    let (_file, key) = unique_key(3);
    let Some(mut segment) = create_or_skip(key, size) else {
        return;
    };
    segment.attach().expect("attach");
    fill_pattern(segment.as_mut_slice().expect("view"));
    let expected = segment.as_slice().expect("view").to_vec();

    for _ in 0..HELPERS {
        let status = helper("detach", key, size).status().expect("run helper");
        assert!(status.success(), "helper failed: {status}");
    }

    let stat = segment.stat().expect("segment still allocated");
    assert_eq!(stat.attach_count, 1);
    assert!(!stat.marked_for_removal);
    assert_eq!(segment.as_slice().expect("view"), expected.as_slice());

    segment.detach().expect("detach");
    assert!(!is_destroyed(&segment), "detach alone never destroys");
    assert_eq!(segment.remove().expect("remove"), Removal::Marked);
    assert!(is_destroyed(&segment));
}

#[test]
fn test_killed_attachers_release_segment() {
    let (_file, key) = unique_key(4);
    let Some(mut segment) = create_or_skip(key, SIZE) else {
        return;
    };

    let mut children = spawn_sleepers(key, SIZE, HELPERS);
    wait_for_attach_count(&segment, HELPERS as u64, &mut children, ATTACH_TIMEOUT);

    assert_eq!(segment.remove().expect("remove"), Removal::Marked);
    assert!(!is_destroyed(&segment), "helpers still attached");

    for child in &mut children {
        child.kill().expect("SIGKILL helper");
    }
    for child in &mut children {
        let status = child.wait().expect("wait helper");
        assert!(!status.success());
    }

    assert!(is_destroyed(&segment));
}

#[test]
fn test_kill_without_remove_keeps_segment() {
    let (_file, key) = unique_key(5);
    let Some(mut segment) = create_or_skip(key, SIZE) else {
        return;
    };
    segment.attach().expect("attach");
    fill_pattern(segment.as_mut_slice().expect("view"));

    let mut children = spawn_sleepers(key, SIZE, 2);
    wait_for_attach_count(&segment, 3, &mut children, ATTACH_TIMEOUT);

    for child in &mut children {
        child.kill().expect("SIGKILL helper");
        child.wait().expect("wait helper");
    }

    // Killed attachers count as detached; nothing was removed.
    assert_eq!(segment.stat().expect("stat").attach_count, 1);
    assert_eq!(segment.as_slice().expect("view")[100], 100);

    assert_eq!(segment.attach_and_remove().expect("remove"), Removal::Marked);
    segment.detach().expect("detach");
    assert!(is_destroyed(&segment));
}

#[test]
#[allow(unsafe_code)]
fn test_terminated_sleeper_exits_cleanly() {
    let (_file, key) = unique_key(6);
    let Some(mut segment) = create_or_skip(key, SIZE) else {
        return;
    };

    let mut children = spawn_sleepers(key, SIZE, 1);
    wait_for_attach_count(&segment, 1, &mut children, ATTACH_TIMEOUT);
    assert_eq!(segment.remove().expect("remove"), Removal::Marked);

    let pid = libc::pid_t::try_from(children[0].id()).expect("pid");
    // SAFETY: pid belongs to a child we spawned and have not reaped.
    assert_eq!(unsafe { libc::kill(pid, libc::SIGTERM) }, 0);

    let status = children[0].wait().expect("wait helper");
    assert!(status.success(), "helper should exit 0 on SIGTERM: {status}");
    assert!(is_destroyed(&segment));

    assert!(
        SegmentHandle::get(key, SIZE)
            .expect_err("segment gone")
            .is_not_found()
    );
}
