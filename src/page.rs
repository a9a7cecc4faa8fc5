//! Server-rendered HTML for the landing, chat and error pages.
//!
//! The chat page is a single document with an inline script that keeps a
//! per-tab session id in `sessionStorage`, posts the growing transcript to
//! `/api/chat-stream`, and appends streamed deltas to the last assistant
//! bubble. The fetch is aborted when the page is torn down.

use crate::models::CanonicalUrl;

const STYLE: &str = r#"
body { margin: 0; font-family: system-ui, sans-serif; background: #18181b; color: #f4f4f5; }
main { max-width: 48rem; margin: 0 auto; padding: 1.5rem; display: flex; flex-direction: column; min-height: 100vh; box-sizing: border-box; }
header a { color: #a5b4fc; word-break: break-all; }
.notice { background: #7c2d12; padding: .5rem .75rem; border-radius: .375rem; margin: .75rem 0; }
#log { flex: 1; display: flex; flex-direction: column; gap: .75rem; padding: 1rem 0; }
.msg { padding: .5rem .75rem; border-radius: .5rem; white-space: pre-wrap; }
.user { background: #3f3f46; align-self: flex-end; }
.assistant { background: #27272a; }
.error { background: #7f1d1d; }
form { display: flex; gap: .5rem; }
input { flex: 1; padding: .6rem; border-radius: .375rem; border: 1px solid #52525b; background: #27272a; color: inherit; }
button { padding: .6rem 1rem; border-radius: .375rem; border: 0; background: #4f46e5; color: white; }
"#;

const CHAT_SCRIPT: &str = r#"
(() => {
  const KEY = "pagechat-session";
  const cfg = JSON.parse(document.getElementById("pagechat-config").textContent);
  let sessionId = sessionStorage.getItem(KEY);
  if (!sessionId) { sessionId = cfg.sessionId; sessionStorage.setItem(KEY, sessionId); }

  const log = document.getElementById("log");
  const form = document.getElementById("chat");
  const input = document.getElementById("input");
  const messages = [];
  let inflight = null;

  const bubble = (role, text) => {
    const el = document.createElement("div");
    el.className = "msg " + role;
    el.textContent = text;
    log.appendChild(el);
    el.scrollIntoView({ block: "end" });
    return el;
  };

  window.addEventListener("pagehide", () => inflight && inflight.abort());

  form.addEventListener("submit", async (ev) => {
    ev.preventDefault();
    const text = input.value.trim();
    if (!text || inflight) return;
    input.value = "";
    messages.push({ role: "user", content: text });
    bubble("user", text);
    const out = bubble("assistant", "");
    let answer = "";
    inflight = new AbortController();
    try {
      const res = await fetch("/api/chat-stream", {
        method: "POST",
        headers: { "Content-Type": "application/json" },
        body: JSON.stringify({ sessionId, url: cfg.url, messages }),
        signal: inflight.signal,
      });
      if (!res.ok) {
        const body = await res.json().catch(() => ({}));
        throw new Error((body.error && body.error.message) || res.statusText);
      }
      const reader = res.body.getReader();
      const decoder = new TextDecoder();
      let buf = "";
      for (;;) {
        const { value, done } = await reader.read();
        if (done) break;
        buf += decoder.decode(value, { stream: true });
        let cut;
        while ((cut = buf.indexOf("\n\n")) >= 0) {
          const frame = buf.slice(0, cut);
          buf = buf.slice(cut + 2);
          const event = (frame.match(/^event: ?(.*)$/m) || [])[1] || "message";
          const data = frame.split("\n").filter(l => l.startsWith("data:")).map(l => l.replace(/^data: ?/, "")).join("\n");
          if (!data) continue;
          const payload = JSON.parse(data);
          if (event === "delta") { answer += payload.text; out.textContent = answer; }
          if (event === "error") { out.className = "msg error"; out.textContent = payload.message; }
        }
      }
      if (answer) messages.push({ role: "assistant", content: answer });
    } catch (err) {
      if (err.name !== "AbortError") { out.className = "msg error"; out.textContent = String(err.message || err); }
    } finally {
      inflight = null;
    }
  });
})();
"#;

/// Chat page bound to `url`. `degraded` carries the indexing failure, if any.
pub fn render_chat_page(url: &CanonicalUrl, session_id: &str, degraded: Option<&str>) -> String {
    let config = serde_json::json!({ "url": url.as_str(), "sessionId": session_id });
    let notice = match degraded {
        Some(reason) => format!(
            r#"<p class="notice">This page could not be indexed, so answers are not grounded in its content. It will be retried on the next visit. ({})</p>"#,
            escape_html(reason)
        ),
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Chat: {title}</title>
<style>{style}</style>
</head>
<body>
<main>
<header><h1>Ask about this page</h1><a href="{href}" rel="noopener noreferrer" target="_blank">{title}</a></header>
{notice}
<section id="log"></section>
<form id="chat"><input id="input" autocomplete="off" placeholder="Ask a question about the page"><button type="submit">Send</button></form>
</main>
<script id="pagechat-config" type="application/json">{config}</script>
<script>{script}</script>
</body>
</html>"#,
        title = escape_html(url.as_str()),
        href = escape_html(url.as_str()),
        style = STYLE,
        notice = notice,
        config = script_safe_json(&config),
        script = CHAT_SCRIPT,
    )
}

pub fn render_landing_page() -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>pagechat</title><style>{style}</style></head>
<body><main>
<h1>Chat with any web page</h1>
<p>Put a page URL after this site's address, for example
<code>/https://en.wikipedia.org/wiki/Tom_Harley</code>.</p>
<p>The page is indexed on its first visit; after that, ask questions and get answers grounded in its content.</p>
</main></body>
</html>"#,
        style = STYLE
    )
}

pub fn render_error_page(status: u16, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Error {status}</title><style>{style}</style></head>
<body><main><h1>Something went wrong ({status})</h1><p class="notice">{message}</p><p><a href="/">Back</a></p></main></body>
</html>"#,
        status = status,
        style = STYLE,
        message = escape_html(message)
    )
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// JSON that cannot close the surrounding `<script>` element.
fn script_safe_json(value: &serde_json::Value) -> String {
    value.to_string().replace('<', "\\u003c")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_chat_page_embeds_url_and_session() {
        let url = CanonicalUrl::new("https://example.com/wiki/Tom_Harley");
        let html = render_chat_page(&url, "abc123", None);
        assert!(html.contains(r#""sessionId":"abc123""#));
        assert!(html.contains(r#""url":"https://example.com/wiki/Tom_Harley""#));
        assert!(!html.contains("could not be indexed"));
    }

    #[test]
    fn test_chat_page_degraded_notice_escaped() {
        let url = CanonicalUrl::new("https://example.com");
        let html = render_chat_page(&url, "s", Some("<b>502</b>"));
        assert!(html.contains("could not be indexed"));
        assert!(html.contains("&lt;b&gt;502&lt;/b&gt;"));
    }

    #[test]
    fn test_url_cannot_break_out_of_script() {
        let url = CanonicalUrl::new("https://x.test/</script><script>alert(1)</script>");
        let html = render_chat_page(&url, "s", None);
        assert!(!html.contains("</script><script>alert(1)"));
        assert!(html.contains("\\u003c/script>"));
    }
}
