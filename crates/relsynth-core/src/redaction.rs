/// Replace credentials in a connection string with `***`.
///
/// Handles the `user:password@` authority form and `password=`-style query
/// parameters, leaving host, port and database readable for logs.
pub fn redact_connection_string(conn: &str) -> String {
    let (base, query) = match conn.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (conn, None),
    };

    let mut redacted = match base.split_once("://") {
        Some((scheme, rest)) => match rest.rsplit_once('@') {
            Some((auth, host)) => {
                let user = auth.split_once(':').map(|(user, _)| user);
                match user {
                    Some(user) => format!("{scheme}://{user}:***@{host}"),
                    None => format!("{scheme}://{auth}@{host}"),
                }
            }
            None => base.to_string(),
        },
        None => base.to_string(),
    };

    if let Some(query) = query {
        let params: Vec<String> = query
            .split('&')
            .map(|pair| match pair.split_once('=') {
                Some((key, _)) if is_sensitive_key(key) => format!("{key}=***"),
                _ => pair.to_string(),
            })
            .collect();
        redacted.push('?');
        redacted.push_str(&params.join("&"));
    }

    redacted
}

fn is_sensitive_key(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "password" | "pass" | "passwd" | "sslpassword" | "token"
    )
}
