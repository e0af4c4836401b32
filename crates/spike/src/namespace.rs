//! Bidirectional mapping between `(server, tool)` pairs and flat wire names.

/// Joins a server and tool name into the flat wire name `server<sep>tool`.
pub fn namespaced_name(server: &str, tool: &str, sep: &str) -> String {
    format!("{server}{sep}{tool}")
}

/// Splits a wire name back into `(server, tool)`.
///
/// Candidates are tried longest-first so that a server name which is a literal
/// prefix of another (`test` vs `test_server`) cannot steal the match.
pub fn parse_namespaced<'a>(
    wire_name: &'a str,
    known_servers: &'a [String],
    sep: &str,
) -> Option<(&'a str, &'a str)> {
    let mut candidates: Vec<&String> = known_servers.iter().collect();
    candidates.sort_by_key(|name| std::cmp::Reverse(name.len()));

    for server in candidates {
        let prefix_len = server.len() + sep.len();
        if wire_name.len() < prefix_len {
            continue;
        }
        let (prefix, tool) = wire_name.split_at(prefix_len);
        if prefix.strip_suffix(sep) == Some(server.as_str()) {
            return Some((&wire_name[..server.len()], tool));
        }
    }
    None
}

/// Removes `server<sep>` from the front of a wire name when present;
/// otherwise returns the input unchanged.
pub fn strip_server_prefix<'a>(wire_name: &'a str, server: &str, sep: &str) -> &'a str {
    let prefix = format!("{server}{sep}");
    wire_name.strip_prefix(prefix.as_str()).unwrap_or(wire_name)
}
