//! HTML bodies served by the receiver.

pub fn index(session_id: &str, image_url: &str, status_url: &str, validate_url: &str) -> String {
    let session_id = escape(session_id);
    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>scanpad</title>
</head>
<body>
<h1>Scan to validate</h1>
<img id="code" src="{image_url}" alt="QR code for session {session_id}">
<p>Session: <code>{session_id}</code></p>
<p>Status: <span id="status">pending</span></p>
<p><a href="{validate_url}">{validate_url}</a></p>
<script>
(function poll() {{
  fetch({status_url})
    .then(function (r) {{ return r.json(); }})
    .then(function (body) {{
      document.getElementById("status").textContent = body.status;
      if (body.status !== "validated") {{ setTimeout(poll, 1000); }}
    }})
    .catch(function () {{ setTimeout(poll, 3000); }});
}})();
</script>
</body>
</html>
"#,
        image_url = escape(image_url),
        status_url = script_string(status_url),
        validate_url = escape(validate_url),
        session_id = session_id,
    )
}

pub fn validated(session_id: &str) -> String {
    message(
        "Validated",
        &format!("Session {} validated successfully.", escape(session_id)),
    )
}

pub fn already_used(session_id: &str) -> String {
    message(
        "Already used",
        &format!("This code has already been used ({}).", escape(session_id)),
    )
}

pub fn not_found(what: &str) -> String {
    message("Not found", &format!("Unknown session: {}", escape(what)))
}

pub fn scan_ack(session_id: Option<&str>, raised: bool) -> String {
    let id = session_id.map(escape).unwrap_or_else(|| "unknown".to_string());
    if raised {
        message("Scanned", &format!("Scan recorded for {}.", id))
    } else {
        message("Not recorded", &format!("Scan ignored for {}.", id))
    }
}

fn message(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body><h1>{title}</h1><p>{body}</p></body>\n</html>\n"
    )
}

/// A JSON string literal that is also safe inside a `<script>` element.
fn script_string(raw: &str) -> String {
    serde_json::to_string(raw)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/")
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
