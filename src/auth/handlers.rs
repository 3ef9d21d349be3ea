use anyhow::Context;
use axum::{
    extract::{FromRef, Path, State},
    http::header::SET_COOKIE,
    response::Response,
    routing::get,
    Form, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        confirm::ConfirmationSigner,
        dto::{LoginForm, RegisterForm},
        password::{hash_password, verify_against_decoy, verify_password},
        repo::{RepoError, UniqueField},
        repo_types::User,
        session::{CurrentUser, SessionKeys},
    },
    error::AppError,
    flash::{self, Flash, Flashes},
    mail::confirmation_email,
    pages,
    state::AppState,
};

const BAD_CREDENTIALS: &str = "ERROR! Incorrect login credentials.";
const NOT_ACTIVATED: &str = "Your acount is not activated! Please open your email inbox and click activation link we sent to activate it";
const INVALID_LINK: &str = "The confirmation link is invalid or has expired.";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/register", get(register_form).post(register))
        .route("/login", get(login_form).post(login))
        .route("/confirm/:token", get(confirm_email))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/blog", get(blog))
        .route("/logout", get(logout))
}

pub async fn home(flashes: Flashes) -> Response {
    pages::login(flashes, &[], "")
}

pub async fn login_form(flashes: Flashes) -> Response {
    pages::login(flashes, &[], "")
}

pub async fn register_form(flashes: Flashes) -> Response {
    pages::register(flashes, &[], "", "")
}

#[instrument(skip(state, flashes, form))]
pub async fn register(
    State(state): State<AppState>,
    mut flashes: Flashes,
    Form(mut form): Form<RegisterForm>,
) -> Result<Response, AppError> {
    let errors = form.validate();
    if !errors.is_empty() {
        warn!(email = %form.email, errors = errors.len(), "invalid registration form");
        return Ok(pages::register(flashes, &errors, &form.email, &form.username));
    }

    let hash = hash_password(&form.password)?;
    let user = User::new_registered(form.email.clone(), form.username.clone(), hash);

    match state.users.insert(&user).await {
        Ok(()) => {}
        Err(RepoError::Conflict(field)) => {
            warn!(email = %form.email, ?field, "account already exists");
            let message = match field {
                UniqueField::Email => format!("ERROR! Email ({}) already exists.", form.email),
                UniqueField::Username => {
                    format!("ERROR! Username ({}) already exists.", form.username)
                }
            };
            flashes.push(Flash::error(message));
            return Ok(pages::register(flashes, &[], &form.email, &form.username));
        }
        Err(e) => return Err(e.into()),
    }

    let signer = ConfirmationSigner::from_ref(&state);
    let message = confirmation_email(&signer, &state.config.public_url, &user.email)?;
    state.mailer.enqueue(message);

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(flash::redirect(
        "/login",
        vec![Flash::success(
            "Thanks for registering!  Please check your email to confirm your email address.",
        )],
    ))
}

#[instrument(skip(state, flashes, form))]
pub async fn login(
    State(state): State<AppState>,
    mut flashes: Flashes,
    Form(mut form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let errors = form.validate();
    if !errors.is_empty() {
        warn!(email = %form.email, "invalid login form");
        return Ok(pages::login(flashes, &errors, &form.email));
    }

    // Unknown email gets the same answer as a wrong password.
    let Some(mut user) = state.users.find_by_email(&form.email).await? else {
        warn!(email = %form.email, "login unknown email");
        verify_against_decoy(&form.password);
        flashes.push(Flash::error(BAD_CREDENTIALS));
        return Ok(pages::login(flashes, &[], &form.email));
    };

    if !user.email_confirmed {
        warn!(user_id = %user.id, "login before email confirmation");
        flashes.push(Flash::info(NOT_ACTIVATED));
        return Ok(pages::login(flashes, &[], &form.email));
    }

    if !verify_password(&form.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        flashes.push(Flash::error(BAD_CREDENTIALS));
        return Ok(pages::login(flashes, &[], &form.email));
    }

    user.authenticated = true;
    state.users.update(&user).await?;

    let keys = SessionKeys::from_ref(&state);
    let token = keys.sign(user.id)?;
    let cookie = keys.cookie(&token).context("session cookie")?;

    let mut res = flash::redirect(
        "/blog",
        vec![Flash::message(format!("You are logged in now, {}", user.username))],
    );
    res.headers_mut().append(SET_COOKIE, cookie);
    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(res)
}

#[instrument(skip(state, token))]
pub async fn confirm_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    let signer = ConfirmationSigner::from_ref(&state);
    let email = match signer.verify(&token) {
        Ok(email) => email,
        Err(e) => {
            warn!(error = %e, "confirmation token rejected");
            return Ok(flash::redirect("/login", vec![Flash::error(INVALID_LINK)]));
        }
    };

    let Some(mut user) = state.users.find_by_email(&email).await? else {
        warn!(email = %email, "confirmation token for unknown account");
        return Ok(flash::redirect("/login", vec![Flash::error(INVALID_LINK)]));
    };

    let notice = if user.confirm_email(OffsetDateTime::now_utc()) {
        state.users.update(&user).await?;
        info!(user_id = %user.id, "email confirmed");
        Flash::success("Thank you for confirming your email address!")
    } else {
        Flash::info("Account already confirmed. Please login.")
    };
    Ok(flash::redirect("/blog", vec![notice]))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn blog(CurrentUser(user): CurrentUser, flashes: Flashes) -> Response {
    pages::blog(flashes, &user)
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
) -> Result<Response, AppError> {
    user.authenticated = false;
    state.users.update(&user).await?;

    let keys = SessionKeys::from_ref(&state);
    let mut res = flash::redirect(
        "/login",
        vec![Flash::info("You are logged out,we hope you come back soon!")],
    );
    res.headers_mut().append(SET_COOKIE, keys.clear_cookie());
    info!(user_id = %user.id, "user logged out");
    Ok(res)
}
