//! HTML for the browser-facing steps of the flow.
use crate::utils::escape_html;

const STYLE: &str = "body{font-family:system-ui,sans-serif;background:#f4f6f8;margin:0}\
main{max-width:420px;margin:4rem auto;background:#fff;padding:2rem;border-radius:8px;\
box-shadow:0 1px 4px rgba(0,0,0,.1)}h1{font-size:1.3rem;color:#0b5d3b}\
label{display:block;margin-top:1rem}input{width:100%;padding:.5rem;box-sizing:border-box}\
button{margin-top:1.5rem;padding:.6rem 1.2rem;background:#0b5d3b;color:#fff;border:0;border-radius:4px}\
button.secondary{background:#888}.error{color:#b00020}";

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width,initial-scale=1\">\
<title>{title} | WanGov</title><style>{STYLE}</style></head>\
<body><main>{body}</main></body></html>",
        title = escape_html(title),
    )
}

pub fn login_page(client_name: Option<&str>, error: Option<&str>) -> String {
    let target = match client_name {
        Some(name) => format!("<p>to continue to <strong>{}</strong></p>", escape_html(name)),
        None => String::new(),
    };
    let error = match error {
        Some(message) => format!("<p class=\"error\">{}</p>", escape_html(message)),
        None => String::new(),
    };
    let body = format!(
        "<h1>Sign in with WanGov</h1>{target}{error}\
<form method=\"post\" action=\"/login\">\
<label for=\"identifier\">NIN or email</label>\
<input id=\"identifier\" name=\"identifier\" autocomplete=\"username\" required>\
<label for=\"password\">Password</label>\
<input id=\"password\" name=\"password\" type=\"password\" autocomplete=\"current-password\" required>\
<button type=\"submit\">Sign in</button></form>"
    );
    layout("Sign in", &body)
}

pub fn consent_page(client_name: &str, citizen_name: &str, scopes: &[String]) -> String {
    let items: String = scopes
        .iter()
        .map(|scope| format!("<li>{}</li>", escape_html(describe_scope(scope))))
        .collect();
    let body = format!(
        "<h1>Allow access?</h1>\
<p>Signed in as <strong>{citizen}</strong>.</p>\
<p><strong>{client}</strong> is requesting:</p><ul>{items}</ul>\
<form method=\"post\" action=\"/consent\">\
<button name=\"decision\" value=\"approve\" type=\"submit\">Allow</button> \
<button class=\"secondary\" name=\"decision\" value=\"deny\" type=\"submit\">Deny</button>\
</form>",
        citizen = escape_html(citizen_name),
        client = escape_html(client_name),
    );
    layout("Consent", &body)
}

fn describe_scope(scope: &str) -> &str {
    match scope {
        "openid" => "Your WanGov identifier",
        "profile" => "Your name and National Identification Number",
        "email" => "Your email address",
        "phone" => "Your phone number",
        other => other,
    }
}

pub fn error_page(message: &str) -> String {
    let body = format!(
        "<h1>Sign-in request rejected</h1><p class=\"error\">{}</p>",
        escape_html(message)
    );
    layout("Error", &body)
}

pub fn signed_out_page() -> String {
    layout(
        "Signed out",
        "<h1>You have been signed out</h1><p>You may now close this window.</p>",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_page_escapes_inputs() {
        let html = login_page(Some("<b>Portal</b>"), Some("bad \"creds\""));
        assert!(html.contains("&lt;b&gt;Portal&lt;/b&gt;"));
        assert!(html.contains("bad &quot;creds&quot;"));
        assert!(html.contains("action=\"/login\""));
    }

    #[test]
    fn consent_page_lists_scopes() {
        let html = consent_page(
            "MDA WordPress Site",
            "Aminata Kamara",
            &["openid".to_string(), "email".to_string()],
        );
        assert!(html.contains("Your email address"));
        assert!(html.contains("value=\"deny\""));
    }
}
