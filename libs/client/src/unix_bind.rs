//! Binds a client-side `AF_UNIX` address before connecting: the client
//! binds `CLI_PATH/<md5(app "/" runner)>-<pid>` at mode `0700` before
//! connecting to the server's listening path. Neither `std` nor `tokio`
//! expose a bind-then-connect sequence for stream sockets, so this goes
//! through raw `libc` calls and hands the resulting fd to Tokio once
//! connected.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::FromRawFd;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;

fn path_to_sockaddr(path: &Path) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    let bytes = path.as_os_str().as_bytes();
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path {path:?} too long for an AF_UNIX address"),
        ));
    }
    for (slot, b) in addr.sun_path.iter_mut().zip(bytes.iter()) {
        *slot = *b as libc::c_char;
    }
    let len = (std::mem::size_of::<libc::sa_family_t>() + bytes.len() + 1) as libc::socklen_t;
    Ok((addr, len))
}

/// Create an `AF_UNIX`/`SOCK_STREAM` socket, bind it to `client_path` at mode
/// `0700`, then connect it to `server_path`. Returns the connected socket as
/// a blocking std socket; the caller is responsible for handing it to the
/// async runtime.
pub fn bind_and_connect(server_path: &Path, client_path: &Path) -> io::Result<StdUnixStream> {
    unsafe {
        let fd = libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let (client_addr, client_len) = match path_to_sockaddr(client_path) {
            Ok(v) => v,
            Err(e) => {
                libc::close(fd);
                return Err(e);
            }
        };
        if libc::bind(fd, &client_addr as *const _ as *const libc::sockaddr, client_len) != 0 {
            let e = io::Error::last_os_error();
            libc::close(fd);
            return Err(e);
        }

        if let Ok(c_path) = CString::new(client_path.as_os_str().as_bytes()) {
            libc::chmod(c_path.as_ptr(), 0o700);
        }

        let (server_addr, server_len) = match path_to_sockaddr(server_path) {
            Ok(v) => v,
            Err(e) => {
                libc::close(fd);
                return Err(e);
            }
        };
        if libc::connect(fd, &server_addr as *const _ as *const libc::sockaddr, server_len) != 0 {
            let e = io::Error::last_os_error();
            libc::close(fd);
            return Err(e);
        }

        Ok(StdUnixStream::from_raw_fd(fd))
    }
}

/// The per-process client address: `CLI_PATH/<md5(app "/" runner)>-<pid>`.
pub fn client_address(cli_dir: &Path, app: &str, runner: &str) -> std::path::PathBuf {
    let digest = purcrdr_ids::generate_md5_id(format!("{app}/{runner}").as_bytes());
    cli_dir.join(format!("{digest}-{}", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn client_address_is_deterministic_per_process() {
        let dir = tempdir().unwrap();
        let a = client_address(dir.path(), "cn.fmsoft.test", "t1");
        let b = client_address(dir.path(), "cn.fmsoft.test", "t1");
        assert_eq!(a, b);
        assert!(a.starts_with(dir.path()));
    }

    #[test]
    fn bind_and_connect_round_trips() {
        let dir = tempdir().unwrap();
        let server_path = dir.path().join("server.sock");
        let client_path = dir.path().join("client.sock");

        let listener = std::os::unix::net::UnixListener::bind(&server_path).unwrap();
        let client = bind_and_connect(&server_path, &client_path).unwrap();
        let (_server, _addr) = listener.accept().unwrap();
        drop(client);

        let meta = std::fs::metadata(&client_path).unwrap();
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(meta.permissions().mode() & 0o777, 0o700);
    }
}
