diesel::table! {
    cities (id) {
        id -> Int4,
        name -> Varchar,
    }
}

diesel::table! {
    complaint_types (id) {
        id -> Int4,
        name -> Varchar,
    }
}

diesel::table! {
    insurers (id) {
        id -> Int4,
        name -> Varchar,
        active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    insurer_emails (id) {
        id -> Int4,
        insurer_id -> Int4,
        email -> Varchar,
        active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    tickets (id) {
        id -> Int4,
        patient_name -> Varchar,
        document_id -> Varchar,
        email -> Nullable<Varchar>,
        phone -> Varchar,
        city_id -> Int4,
        insurer_id -> Int4,
        complaint_type_id -> Int4,
        description -> Text,
        attachment_path -> Nullable<Varchar>,
        status -> Varchar,
        response -> Nullable<Text>,
        response_date -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        notified -> Bool,
    }
}

diesel::table! {
    admin_users (id) {
        id -> Int4,
        username -> Varchar,
        password_hash -> Varchar,
        role -> Varchar,
        city_id -> Nullable<Int4>,
        active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(insurer_emails -> insurers (insurer_id));
diesel::joinable!(tickets -> cities (city_id));
diesel::joinable!(tickets -> insurers (insurer_id));
diesel::joinable!(tickets -> complaint_types (complaint_type_id));
diesel::joinable!(admin_users -> cities (city_id));

diesel::allow_tables_to_appear_in_same_query!(
    admin_users,
    cities,
    complaint_types,
    insurer_emails,
    insurers,
    tickets,
);
