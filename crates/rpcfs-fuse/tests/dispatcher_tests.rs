//! Dispatcher behaviour against an in-process file service.

mod common;

use common::{MockService, Script, remote};
use rpcfs_core::{
    Call, FileService, FileSystemResponse, FuseDirEntry, FuseHandleInfo, FuseStat, RpcError,
    StatusCode,
};
use rpcfs_fuse::{
    CallContext, ConnectionInfo, FileInfo, FileLock, FileOperations, FileStat, FuseError,
    MountOptions, RemoteFs,
};
use rpcfs_mount::{AcquirePolicy, ConnectionPool, PoolError};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn ctx() -> CallContext {
    CallContext::new(1000, 100, 4242).with_umask(0o022)
}

fn success() -> FileSystemResponse {
    FileSystemResponse::status(StatusCode::Success)
}

#[test]
fn test_getattr_forwards_context_and_applies_present_fields() {
    let script = Script::always(FileSystemResponse {
        stats: Some(FuseStat {
            mode: Some(libc::S_IFREG as u32 | 0o644),
            size: Some(1234),
            ..FuseStat::default()
        }),
        ..success()
    });
    let (fs, stats) = remote(1, &script, AcquirePolicy::Block);

    let mut stat = FileStat {
        uid: 42,
        nlink: 7,
        ..FileStat::default()
    };
    fs.getattr(&ctx(), "/a.txt", None, &mut stat).unwrap();

    assert_eq!(stat.size, 1234);
    assert_eq!(stat.mode, libc::S_IFREG as u32 | 0o644);
    assert_eq!(stat.uid, 42, "absent fields must not be overwritten");
    assert_eq!(stat.nlink, 7);

    let calls = script.calls();
    let Call::Getattr {
        path,
        info,
        context,
    } = &calls[0]
    else {
        panic!("unexpected call {:?}", calls[0]);
    };
    assert_eq!(path, "/a.txt");
    assert_eq!(*info, FuseHandleInfo::default());
    assert_eq!(context.uid, Some(1000));
    assert_eq!(context.gid, Some(100));
    assert_eq!(context.pid, Some(4242));
    assert_eq!(context.umask, Some(0o022));
    assert_eq!(stats.snapshot().calls, 1);
}

#[test]
fn test_remote_status_maps_to_errno() {
    let script = Script::always(FileSystemResponse::status(StatusCode::Enoent));
    let (fs, stats) = remote(1, &script, AcquirePolicy::Block);

    let err = fs
        .getattr(&ctx(), "/missing", None, &mut FileStat::default())
        .unwrap_err();
    assert!(matches!(err, FuseError::Remote(StatusCode::Enoent)));
    assert_eq!(err.to_errno(), libc::ENOENT);
    assert_eq!(stats.snapshot().remote_failures, 1);
    assert_eq!(fs.pool().len(), 1);
}

#[test]
fn test_success_without_payload_is_canceled() {
    let script = Script::always(success());
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    let err = fs
        .getattr(&ctx(), "/a", None, &mut FileStat::default())
        .unwrap_err();
    assert_eq!(err.to_errno(), libc::ECANCELED);
}

#[test]
fn test_open_keeps_remote_handle() {
    let script = Script::always(FileSystemResponse {
        info: Some(FuseHandleInfo {
            fh: Some(77),
            keep_cache: Some(true),
            ..FuseHandleInfo::default()
        }),
        ..success()
    });
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    let mut fi = FileInfo::with_flags(libc::O_RDWR);
    fs.open(&ctx(), "/f", &mut fi).unwrap();
    assert_eq!(fi.fh, 77);
    assert!(fi.keep_cache);
    assert_eq!(fi.flags, libc::O_RDWR);

    let Call::Open { info, .. } = &script.calls()[0] else {
        panic!("expected open");
    };
    assert_eq!(info.flags, Some(libc::O_RDWR));
    assert_eq!(info.fh, Some(0));
}

#[test]
fn test_read_truncates_to_buffer() {
    let script = Script::always(FileSystemResponse {
        data: Some(b"hello world".to_vec()),
        ..success()
    });
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    let mut buf = [0u8; 5];
    let n = fs
        .read(&ctx(), "/f", &mut buf, 0, &FileInfo::default())
        .unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf, b"hello");

    let Call::Read { size, offset, .. } = &script.calls()[0] else {
        panic!("expected read");
    };
    assert_eq!(*size, 5);
    assert_eq!(*offset, 0);
}

#[test]
fn test_readlink_truncates_to_buffer() {
    let script = Script::always(FileSystemResponse {
        link_path: Some("/very/long/target".to_string()),
        ..success()
    });
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    let mut buf = [0u8; 5];
    assert_eq!(fs.readlink(&ctx(), "/l", &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"/very");
}

#[test]
fn test_partial_write_reports_remote_count() {
    let script = Script::always(FileSystemResponse {
        data_written: Some(3),
        ..success()
    });
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    let n = fs
        .write(&ctx(), "/f", b"abcdefgh", 16, &FileInfo::default())
        .unwrap();
    assert_eq!(n, 3);

    let Call::Write { data, offset, .. } = &script.calls()[0] else {
        panic!("expected write");
    };
    assert_eq!(data, b"abcdefgh");
    assert_eq!(*offset, 16);
}

#[test]
fn test_write_count_is_clamped_to_data() {
    let script = Script::always(FileSystemResponse {
        data_written: Some(1000),
        ..success()
    });
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    let n = fs
        .write(&ctx(), "/f", b"abc", 0, &FileInfo::default())
        .unwrap();
    assert_eq!(n, 3);
}

#[test]
fn test_write_failure_returns_errno() {
    let script = Script::always(FileSystemResponse::status(StatusCode::Enospc));
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    let err = fs
        .write(&ctx(), "/f", b"abc", 0, &FileInfo::default())
        .unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOSPC);
}

#[test]
fn test_negative_write_count_is_protocol_error() {
    let script = Script::always(FileSystemResponse {
        data_written: Some(-1),
        ..success()
    });
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    let err = fs
        .write(&ctx(), "/f", b"abc", 0, &FileInfo::default())
        .unwrap_err();
    assert!(matches!(err, FuseError::Canceled(RpcError::Protocol(_))));
}

#[test]
fn test_getxattr_size_query_and_overflow() {
    let script = Script::always(FileSystemResponse {
        attribute_value: Some(b"0123456789".to_vec()),
        ..success()
    });
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    assert_eq!(fs.getxattr(&ctx(), "/f", "user.tag", &mut []).unwrap(), 10);

    let mut small = [0xAAu8; 4];
    let err = fs
        .getxattr(&ctx(), "/f", "user.tag", &mut small)
        .unwrap_err();
    assert!(matches!(
        err,
        FuseError::InsufficientBuffer {
            needed: 10,
            capacity: 4
        }
    ));
    assert_eq!(err.to_errno(), libc::ERANGE);
    assert_eq!(small, [0xAA; 4], "buffer must be untouched on overflow");

    let mut big = [0u8; 16];
    assert_eq!(fs.getxattr(&ctx(), "/f", "user.tag", &mut big).unwrap(), 10);
    assert_eq!(&big[..10], b"0123456789");
}

#[test]
fn test_readdir_stops_when_filler_is_full() {
    let entries = ["a", "b", "c", "d", "e"]
        .into_iter()
        .map(|name| FuseDirEntry {
            name: name.to_string(),
            stats: FuseStat {
                mode: Some(libc::S_IFREG as u32 | 0o644),
                ..FuseStat::default()
            },
        })
        .collect();
    let script = Script::always(FileSystemResponse {
        dir_entry: Some(entries),
        ..success()
    });
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    let mut seen = Vec::new();
    fs.readdir(&ctx(), "/", 0, &FileInfo::default(), &mut |name, stat| {
        assert_eq!(stat.mode & libc::S_IFMT as u32, libc::S_IFREG as u32);
        seen.push(name.to_string());
        seen.len() == 2
    })
    .unwrap();
    assert_eq!(seen, ["a", "b"]);
}

#[test]
fn test_access_forwards_mask() {
    let script = Script::always(success());
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    fs.access(&ctx(), "/f", libc::R_OK | libc::W_OK).unwrap();
    let Call::Access { mask, .. } = &script.calls()[0] else {
        panic!("expected access");
    };
    assert_eq!(mask.0, (libc::R_OK | libc::W_OK) as u32);
}

#[test]
fn test_init_reports_mount_options() {
    let script = Script::always(success());
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    let options = MountOptions {
        attr_timeout: 2.5,
        ..MountOptions::default()
    };
    fs.init(&ConnectionInfo::default(), &options).unwrap();
    let Call::Init { config, .. } = &script.calls()[0] else {
        panic!("expected init");
    };
    assert_eq!(config.attr_timeout, Some(2.5));
}

#[test]
fn test_transport_error_cancels_and_reconnects() {
    let failed = AtomicBool::new(false);
    let script = Script::new(move |_| {
        if failed.swap(true, Ordering::SeqCst) {
            Ok(FileSystemResponse::status(StatusCode::Success))
        } else {
            Err(RpcError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "reset by peer",
            )))
        }
    });
    let (fs, stats) = remote(1, &script, AcquirePolicy::Block);

    let err = fs.unlink(&ctx(), "/f").unwrap_err();
    assert!(matches!(err, FuseError::Canceled(RpcError::Io(_))));
    assert_eq!(err.to_errno(), libc::ECANCELED);

    // The client is back in the pool, closed.
    assert_eq!(fs.pool().len(), 1);
    assert_eq!(script.connected(), 0);

    fs.unlink(&ctx(), "/f").unwrap();
    assert_eq!(script.connected(), 1);
    assert_eq!(script.opens(), 2);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.transport_errors, 1);
    assert_eq!(snapshot.reconnects, 1);
    assert_eq!(snapshot.calls, 2);
}

#[test]
fn test_non_blocking_on_empty_pool_is_eagain() {
    let script = Script::always(success());
    let (fs, stats) = remote(1, &script, AcquirePolicy::NonBlocking);

    let held = fs.pool().try_acquire().unwrap();
    let err = fs.mkdir(&ctx(), "/d", 0o755).unwrap_err();
    assert!(matches!(err, FuseError::Unavailable(PoolError::Empty)));
    assert_eq!(err.to_errno(), libc::EAGAIN);
    assert_eq!(stats.snapshot().unavailable, 1);
    assert!(script.calls().is_empty());

    fs.pool().release(held);
    fs.mkdir(&ctx(), "/d", 0o755).unwrap();
}

#[test]
fn test_closed_pool_is_enotconn() {
    let script = Script::always(success());
    let (fs, _) = remote(1, &script, AcquirePolicy::Block);

    fs.pool().close();
    drop(fs.pool().drain());

    let err = fs.rmdir(&ctx(), "/d").unwrap_err();
    assert!(matches!(err, FuseError::Unavailable(PoolError::Closed)));
    assert_eq!(err.to_errno(), libc::ENOTCONN);
}

#[test]
fn test_unsupported_operations_do_not_borrow_a_client() {
    let script = Script::always(success());
    // An empty blocking pool would hang any operation that tried to borrow.
    let pool: Arc<ConnectionPool<MockService>> = Arc::new(ConnectionPool::new(1));
    let fs = RemoteFs::new(pool);
    let c = ctx();
    let fi = FileInfo::default();

    let errors = [
        fs.listxattr(&c, "/f", &mut [0u8; 64]).unwrap_err(),
        fs.removexattr(&c, "/f", "user.tag").unwrap_err(),
        fs.lock(&c, "/f", &fi, libc::F_GETLK, &mut FileLock::default())
            .unwrap_err(),
        fs.bmap(&c, "/f", 4096, &mut 0).unwrap_err(),
    ];
    for err in errors {
        assert!(matches!(err, FuseError::NotImplemented));
        assert_eq!(err.to_errno(), libc::ENOSYS);
    }
    assert!(script.calls().is_empty());
}

#[test]
fn test_destroy_closes_pool_and_clients() {
    let script = Script::always(success());
    let (fs, _) = remote(3, &script, AcquirePolicy::Block);
    assert_eq!(script.connected(), 3);

    fs.destroy();

    assert_eq!(script.methods(), ["destroy"]);
    assert!(fs.pool().is_closed());
    assert!(fs.pool().is_empty());
    assert_eq!(script.connected(), 0);

    let err = fs.unlink(&ctx(), "/f").unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOTCONN);
}

#[test]
fn test_client_busy_during_destroy_is_closed_on_return() {
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
    let (gate_tx, gate_rx) = crossbeam_channel::unbounded::<()>();
    let script = Script::new(move |call| {
        if matches!(call, Call::Unlink { .. }) {
            entered_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
        }
        Ok(success())
    });
    let (fs, _) = remote(2, &script, AcquirePolicy::Block);
    let fs = Arc::new(fs);

    let busy = {
        let fs = Arc::clone(&fs);
        std::thread::spawn(move || fs.unlink(&ctx(), "/slow"))
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    fs.destroy();
    assert_eq!(script.connected(), 1);

    gate_tx.send(()).unwrap();
    busy.join().unwrap().unwrap();
    assert_eq!(script.connected(), 0);
    assert!(fs.pool().is_empty());
}

#[test]
fn test_client_reopened_only_when_closed() {
    let script = Script::always(success());
    let (fs, stats) = remote(1, &script, AcquirePolicy::Block);

    {
        let mut conn = fs.pool().try_acquire().unwrap();
        conn.close();
        fs.pool().release(conn);
    }
    fs.unlink(&ctx(), "/a").unwrap();
    fs.unlink(&ctx(), "/b").unwrap();

    assert_eq!(script.opens(), 2);
    assert_eq!(stats.snapshot().reconnects, 1);
}
