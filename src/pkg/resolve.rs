//! Package name aliases and dependency token normalization.

use tracing::debug;

/// Friendly names mapped to real package names. Applied once per request.
pub const ALIASES: &[(&str, &str)] = &[
    ("nvim", "neovim"),
    ("vim", "vim"),
    ("python", "python3"),
    ("py", "python3"),
    ("pip", "py3-pip"),
];

/// Shared-object dependency tokens mapped to the package providing them.
///
/// Hand-maintained. Tokens missing here are dropped.
pub const SONAME_PACKAGES: &[(&str, &str)] = &[
    ("so:libluv.so.1", "luv"),
    ("so:libtermkey.so.1", "libtermkey"),
    ("so:libvterm.so.0", "libvterm"),
    ("so:libmsgpack-c.so.2", "msgpack-c"),
    ("so:libtree-sitter.so.0", "tree-sitter"),
    ("so:libunibilium.so.4", "unibilium"),
    ("so:libintl.so.8", "musl-libintl"),
    ("so:libluajit-5.1.so.2", "luajit"),
    ("so:libuv.so.1", "libuv"),
    ("so:libssl.so.3", "libssl3"),
    ("so:libcrypto.so.3", "libcrypto3"),
    ("so:libz.so.1", "zlib"),
    ("so:libpcre2-8.so.0", "pcre2"),
    ("so:libcurl.so.4", "libcurl"),
    ("so:libnghttp2.so.14", "nghttp2-libs"),
    ("so:libbrotlidec.so.1", "brotli-libs"),
    ("so:libpsl.so.5", "libpsl"),
    ("so:libc-ares.so.2", "c-ares"),
    ("so:libidn2.so.0", "libidn2"),
    ("so:libunistring.so.5", "libunistring"),
    ("so:libncursesw.so.6", "ncurses-libs"),
    ("so:libreadline.so.8", "readline"),
    ("so:libonig.so.5", "oniguruma"),
];

/// Apply the alias table to a requested name.
pub fn resolve_alias(name: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, real)| *real)
        .unwrap_or(name)
}

pub fn soname_package(token: &str) -> Option<&'static str> {
    SONAME_PACKAGES
        .iter()
        .find(|(soname, _)| *soname == token)
        .map(|(_, package)| *package)
}

/// Turn a raw `depend = ` token into an installable package name.
///
/// Command, pkg-config and path references yield `None`, as do sonames with
/// no known provider. Version constraints are cut at the first `=`, `<` or `>`.
pub fn normalize_dependency(token: &str) -> Option<String> {
    let token = token.trim();
    if token.is_empty()
        || token.starts_with("cmd:")
        || token.starts_with("pc:")
        || token.starts_with('/')
    {
        return None;
    }

    let name = if token.starts_with("so:") {
        match soname_package(token) {
            Some(package) => package,
            None => {
                debug!("dropping unmapped soname dependency {}", token);
                return None;
            }
        }
    } else {
        token
    };

    let end = name
        .find(|c: char| matches!(c, '=' | '<' | '>'))
        .unwrap_or(name.len());
    let name = name[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}
