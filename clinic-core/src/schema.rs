use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

table! {
    users (id) {
        id -> BigInt,
        user_name -> Text,
        user_name_normalized -> Text,
        display_name -> Nullable<Text>,
        phone -> Nullable<Text>,
        notify_channel_id -> Nullable<Text>,
        attended_count -> Integer,
        missed_count -> Integer,
        score -> Integer,
        category -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    appointments (id) {
        id -> BigInt,
        doctor_name -> Text,
        starts_at -> Timestamptz,
        status -> Text,
        user_name -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    reminders (id) {
        id -> BigInt,
        appointment_id -> BigInt,
        message_category -> Text,
        send_time -> Timestamptz,
        status -> Text,
        template_text -> Nullable<Text>,
    }
}

table! {
    demand_cells (id) {
        id -> BigInt,
        doctor_name -> Text,
        year -> Integer,
        month -> Integer,
        day_of_week -> Integer,
        hour -> Integer,
        total_appointments -> Integer,
        high_demand_threshold -> Double,
        source -> Text,
        last_updated -> Timestamptz,
    }
}

table! {
    messages (id) {
        id -> BigInt,
        category -> Text,
        text -> Text,
    }
}

table! {
    scheduler_jobs (id) {
        id -> BigInt,
        kind -> Text,
        job_key -> Text,
        fire_at -> Timestamptz,
        payload -> Jsonb,
        status -> Text,
        attempts -> Integer,
        created_at -> Timestamptz,
    }
}

joinable!(reminders -> appointments (appointment_id));

allow_tables_to_appear_in_same_query!(
    users,
    appointments,
    reminders,
    demand_cells,
    messages,
    scheduler_jobs,
);
