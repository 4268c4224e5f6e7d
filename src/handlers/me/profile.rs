use axum::{Extension, extract::State};

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::Json;
use crate::middleware::UserContext;
use crate::models::{Profile, UpdateProfile};

pub async fn get_me(Extension(user): Extension<UserContext>) -> Json<Profile> {
    Json(user.profile)
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<UserContext>,
    Json(input): Json<UpdateProfile>,
) -> Result<Json<Profile>> {
    input.validate()?;
    let conn = state.db.get()?;
    let profile = queries::update_profile(&conn, user.user_id(), &input)?
        .or_not_found(msg::PROFILE_NOT_FOUND)?;
    Ok(Json(profile))
}
