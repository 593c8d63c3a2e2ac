// Mirrors migrations/2025-01-01-000000_init/up.sql.

diesel::table! {
    device_status (device_id) {
        device_id -> Text,
        status -> Text,
        last_refresh -> Nullable<Text>,
        widgets -> Text,
        system -> Text,
        updated_at -> BigInt,
    }
}

diesel::table! {
    devices (device_id) {
        device_id -> Text,
        user_id -> Text,
        device_name -> Text,
        registered_at -> BigInt,
        last_seen -> Nullable<BigInt>,
        is_online -> Bool,
        display_preview -> Nullable<Text>,
        config -> Nullable<Text>,
    }
}

diesel::table! {
    registration_codes (code) {
        code -> Text,
        device_id -> Text,
        created_at -> BigInt,
        expires_at -> BigInt,
        claimed_by -> Nullable<Text>,
        claimed_at -> Nullable<BigInt>,
    }
}

diesel::table! {
    sessions (token) {
        token -> Text,
        user_id -> Text,
        created_at -> BigInt,
        expires_at -> BigInt,
    }
}

diesel::table! {
    users (id) {
        id -> Text,
        email -> Text,
        password_hash -> Text,
        created_at -> BigInt,
    }
}

diesel::joinable!(devices -> users (user_id));
diesel::joinable!(registration_codes -> users (claimed_by));
diesel::joinable!(sessions -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    device_status,
    devices,
    registration_codes,
    sessions,
    users,
);
