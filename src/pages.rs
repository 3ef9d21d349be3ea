use axum::{
    http::header::SET_COOKIE,
    response::{Html, IntoResponse, Response},
};

use crate::{
    auth::repo_types::User,
    flash::{self, Flashes},
};

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

fn layout(title: &str, flashes: &Flashes, errors: &[String], content: &str) -> String {
    let mut notices = String::new();
    for f in &flashes.messages {
        notices.push_str(&format!(
            "<div class=\"flash {}\">{}</div>\n",
            f.category.as_str(),
            escape(&f.message)
        ));
    }
    for e in errors {
        notices.push_str(&format!("<div class=\"flash info\">{}</div>\n", escape(e)));
    }
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body>\n<h1>{title}</h1>\n{notices}{content}\n</body>\n</html>\n"
    )
}

/// Render and, when the request carried a flash cookie, clear it.
fn respond(flashes: &Flashes, body: String) -> Response {
    let mut res = Html(body).into_response();
    if flashes.consumed() {
        res.headers_mut().append(SET_COOKIE, flash::clear_cookie());
    }
    res
}

pub fn login(flashes: Flashes, errors: &[String], email: &str) -> Response {
    let form = format!(
        "<form method=\"post\" action=\"/login\">\n\
         <label>Email <input type=\"email\" name=\"email\" value=\"{}\"></label>\n\
         <label>Password <input type=\"password\" name=\"password\"></label>\n\
         <button type=\"submit\">Login</button>\n</form>\n\
         <p><a href=\"/register\">Create an account</a></p>",
        escape(email)
    );
    respond(&flashes, layout("Login", &flashes, errors, &form))
}

pub fn register(flashes: Flashes, errors: &[String], email: &str, username: &str) -> Response {
    let form = format!(
        "<form method=\"post\" action=\"/register\">\n\
         <label>Email <input type=\"email\" name=\"email\" value=\"{}\"></label>\n\
         <label>Username <input type=\"text\" name=\"username\" value=\"{}\"></label>\n\
         <label>Password <input type=\"password\" name=\"password\"></label>\n\
         <button type=\"submit\">Register</button>\n</form>\n\
         <p><a href=\"/login\">Already registered? Log in</a></p>",
        escape(email),
        escape(username)
    );
    respond(&flashes, layout("Register", &flashes, errors, &form))
}

pub fn blog(flashes: Flashes, user: &User) -> Response {
    let content = format!(
        "<p>Welcome to the blog, {}.</p>\n<p><a href=\"/logout\">Logout</a></p>",
        escape(&user.username)
    );
    respond(&flashes, layout("Blog", &flashes, &[], &content))
}

pub fn error_page() -> String {
    layout(
        "Internal Server Error",
        &Flashes::default(),
        &[],
        "<p>Something went wrong. Please try again later.</p>",
    )
}
