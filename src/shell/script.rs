use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Bytes of a file inspected for a shebang.
const HEADER_LEN: usize = 128;

/// True if `path` starts with a `#!` line naming sh or bash.
///
/// Only the first 128 bytes are read. `#!/usr/bin/env bash` counts,
/// `#!/usr/bin/python3` does not. Unreadable files are not scripts.
pub fn is_shell_script(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut buf = [0u8; HEADER_LEN];
    let mut len = 0;
    while len < HEADER_LEN {
        match file.read(&mut buf[len..]) {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(_) => return false,
        }
    }
    is_shell_header(&buf[..len])
}

/// The interpreter of a `#!` line is sh or bash, directly or through `env`.
fn is_shell_header(header: &[u8]) -> bool {
    let header = String::from_utf8_lossy(header);
    let Some(line) = header.strip_prefix("#!").and_then(|rest| rest.lines().next()) else {
        return false;
    };
    let is_shell = |word: &str| matches!(word.rsplit('/').next(), Some("sh" | "bash"));
    let mut words = line.split_whitespace();
    match words.next() {
        Some(interp) if is_shell(interp) => true,
        Some(interp) if interp.rsplit('/').next() == Some("env") => words
            .find(|w| !w.starts_with('-') && !w.contains('='))
            .is_some_and(is_shell),
        _ => false,
    }
}

/// Find an executable named `file` in the `PATH`-style list `path_env`.
///
/// An empty entry means the current directory. Relative entries resolve
/// against `cwd`. Returns the first regular file with any execute bit set.
pub fn look_path(file: &str, path_env: &str, cwd: &Path) -> Option<PathBuf> {
    if path_env.is_empty() {
        return None;
    }
    std::env::split_paths(path_env).find_map(|dir| {
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir
        };
        let candidate = cwd.join(dir).join(file);
        is_executable(&candidate).then_some(candidate)
    })
}

/// Regular file with at least one execute bit.
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[test]
    fn test_shebang_classification() {
        let dir = tempfile::tempdir().unwrap();
        let sh = write_script(dir.path(), "a", "#!/bin/sh\necho hi\n");
        let env_bash = write_script(dir.path(), "b", "#!/usr/bin/env bash\necho hi\n");
        let python = write_script(dir.path(), "c", "#!/usr/bin/python3\nprint('hi')\n");
        let plain = write_script(dir.path(), "d", "echo /bin/sh\n");

        assert!(is_shell_script(&sh));
        assert!(is_shell_script(&env_bash));
        assert!(!is_shell_script(&python));
        assert!(!is_shell_script(&plain));
        assert!(!is_shell_script(&dir.path().join("missing")));
    }

    #[test]
    fn test_shebang_interpreter_word() {
        for header in [
            "#!/bin/sh",
            "#!/bin/bash -e\n",
            "#! /usr/local/bin/bash\n",
            "#!/usr/bin/env bash\n",
            "#!/usr/bin/env sh\n",
            "#!/usr/bin/env -S bash -x\n",
            "#!/usr/bin/env LC_ALL=C sh\n",
        ] {
            assert!(is_shell_header(header.as_bytes()), "{header}");
        }
        for header in [
            "#!/usr/bin/python3\n",
            "#!/usr/bin/env python3\n",
            "#!/bin/shell\n",
            "#!/usr/bin/env\n",
            "#!\n/bin/sh\n",
            "echo #!/bin/sh\n",
        ] {
            assert!(!is_shell_header(header.as_bytes()), "{header}");
        }
    }

    #[test]
    fn test_shebang_must_be_in_first_128_bytes() {
        let mut header = String::from("#!");
        header.push_str(&" ".repeat(200));
        header.push_str("/bin/sh\n");
        assert!(!is_shell_header(&header.as_bytes()[..HEADER_LEN]));
    }

    #[cfg(unix)]
    #[test]
    fn test_look_path_order_and_exec_bit() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(first.join("tool"), "not executable").unwrap();
        let expected = write_script(&second, "tool", "#!/bin/sh\n");

        let path_env = format!("{}:{}", first.display(), second.display());
        assert_eq!(look_path("tool", &path_env, dir.path()), Some(expected));
        assert_eq!(look_path("missing", &path_env, dir.path()), None);
        assert_eq!(look_path("tool", "", dir.path()), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_look_path_empty_entry_is_cwd() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "local.sh", "#!/bin/sh\n");
        let found = look_path("local.sh", ":/nonexistent", dir.path()).unwrap();
        assert!(found.ends_with("local.sh"));
        assert!(is_executable(&found));
    }
}
