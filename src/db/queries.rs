/// Channel the `inprogress` trigger publishes row changes on.
pub const NOTIFY_CHANNEL: &str = "pickupchange";

pub const CREATE_INPROGRESS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS inprogress (
    phonenumber CHAR(10) NOT NULL,
    deviceid VARCHAR(64) NOT NULL,
    initiallatitude DOUBLE PRECISION NOT NULL,
    initiallongitude DOUBLE PRECISION NOT NULL,
    initialheading DOUBLE PRECISION NOT NULL DEFAULT -1,
    initialtime TIMESTAMP NOT NULL,
    latestlatitude DOUBLE PRECISION NOT NULL,
    latestlongitude DOUBLE PRECISION NOT NULL,
    latestheading DOUBLE PRECISION NOT NULL DEFAULT -1,
    latesttime TIMESTAMP NOT NULL,
    confirmtime TIMESTAMP NULL,
    completetime TIMESTAMP NULL,
    status INT NOT NULL,
    version BIGINT NOT NULL DEFAULT 0,
    CONSTRAINT inprogress_pkey PRIMARY KEY (phonenumber, deviceid, initialtime),
    CONSTRAINT check_phonenumber_inprogress CHECK (CHAR_LENGTH(phonenumber) = 10)
);
"#;

pub const CREATE_INPROGRESS_PHONE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS inprogress_phonenumber_key ON inprogress (phonenumber);
"#;

pub const CREATE_PASTPICKUPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS pastpickups (
    phonenumber CHAR(10) NOT NULL,
    deviceid VARCHAR(64) NOT NULL,
    initiallatitude DOUBLE PRECISION NOT NULL,
    initiallongitude DOUBLE PRECISION NOT NULL,
    initialheading DOUBLE PRECISION NOT NULL DEFAULT -1,
    initialtime TIMESTAMP NOT NULL,
    latestlatitude DOUBLE PRECISION NOT NULL,
    latestlongitude DOUBLE PRECISION NOT NULL,
    latestheading DOUBLE PRECISION NOT NULL DEFAULT -1,
    latesttime TIMESTAMP NOT NULL,
    confirmtime TIMESTAMP NULL,
    completetime TIMESTAMP NULL,
    status INT NOT NULL,
    version BIGINT NOT NULL DEFAULT 0,
    archivedat TIMESTAMP NOT NULL DEFAULT (NOW() AT TIME ZONE 'utc'),
    CONSTRAINT check_phonenumber_pastpickups CHECK (CHAR_LENGTH(phonenumber) = 10)
);
"#;

// application_name carries the writing instance's origin tag.
pub const CREATE_NOTIFY_FUNCTION: &str = r#"
CREATE OR REPLACE FUNCTION notify_pickup_change() RETURNS trigger AS $$
DECLARE
    phone TEXT;
BEGIN
    IF TG_OP = 'DELETE' THEN
        phone := OLD.phonenumber;
    ELSE
        phone := NEW.phonenumber;
    END IF;
    PERFORM pg_notify('pickupchange', json_build_object(
        'phone_number', phone,
        'origin', current_setting('application_name'),
        'operation', TG_OP
    )::text);
    RETURN NULL;
END;
$$ LANGUAGE plpgsql;
"#;

pub const DROP_NOTIFY_TRIGGER: &str = r#"
DROP TRIGGER IF EXISTS inprogresschange ON inprogress;
"#;

pub const CREATE_NOTIFY_TRIGGER: &str = r#"
CREATE TRIGGER inprogresschange AFTER INSERT OR UPDATE OR DELETE
ON inprogress
FOR EACH ROW
EXECUTE PROCEDURE notify_pickup_change();
"#;

pub const SELECT_LIVE_PICKUPS: &str = r#"
SELECT phonenumber, deviceid, initiallatitude, initiallongitude, initialheading, initialtime,
       latestlatitude, latestlongitude, latestheading, latesttime, confirmtime, completetime,
       status, version
FROM inprogress;
"#;

pub const SELECT_LIVE_PICKUP_BY_PHONE: &str = r#"
SELECT phonenumber, deviceid, initiallatitude, initiallongitude, initialheading, initialtime,
       latestlatitude, latestlongitude, latestheading, latesttime, confirmtime, completetime,
       status, version
FROM inprogress
WHERE phonenumber = $1
ORDER BY initialtime;
"#;

// Affects no rows when the phone number already has a live row.
pub const INSERT_LIVE_PICKUP: &str = r#"
INSERT INTO inprogress (
    phonenumber, deviceid, initiallatitude, initiallongitude, initialheading, initialtime,
    latestlatitude, latestlongitude, latestheading, latesttime, confirmtime, completetime,
    status, version
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 0)
ON CONFLICT (phonenumber) DO NOTHING;
"#;

pub const REPLACE_LIVE_PICKUP: &str = r#"
UPDATE inprogress
SET deviceid = $2,
    initiallatitude = $3,
    initiallongitude = $4,
    initialheading = $5,
    initialtime = $6,
    latestlatitude = $7,
    latestlongitude = $8,
    latestheading = $9,
    latesttime = $10,
    confirmtime = $11,
    completetime = $12,
    status = $13,
    version = $14 + 1
WHERE phonenumber = $1 AND version = $14;
"#;

pub const UPDATE_PICKUP_STATUS: &str = r#"
UPDATE inprogress
SET status = $2,
    deviceid = $3,
    confirmtime = $4,
    completetime = $5,
    version = $6 + 1
WHERE phonenumber = $1 AND version = $6;
"#;

pub const UPDATE_PICKUP_LOCATION: &str = r#"
UPDATE inprogress
SET latestlatitude = $2,
    latestlongitude = $3,
    latestheading = $4,
    latesttime = $5,
    version = $6 + 1
WHERE phonenumber = $1 AND version = $6;
"#;

pub const INSERT_PAST_PICKUP: &str = r#"
INSERT INTO pastpickups (
    phonenumber, deviceid, initiallatitude, initiallongitude, initialheading, initialtime,
    latestlatitude, latestlongitude, latestheading, latesttime, confirmtime, completetime,
    status, version
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14);
"#;

// Matched on creation time, a newer pickup for the same phone survives.
pub const DELETE_LIVE_PICKUP: &str = r#"
DELETE FROM inprogress
WHERE phonenumber = $1 AND initialtime = $2;
"#;

// Archive and delete in one statement. The delete only matches while the row
// is at the version the sweep read, and the insert only sees deleted rows.
pub const ARCHIVE_LIVE_PICKUP_AT_VERSION: &str = r#"
WITH removed AS (
    DELETE FROM inprogress
    WHERE phonenumber = $1 AND initialtime = $6 AND version = $14
    RETURNING phonenumber
)
INSERT INTO pastpickups (
    phonenumber, deviceid, initiallatitude, initiallongitude, initialheading, initialtime,
    latestlatitude, latestlongitude, latestheading, latesttime, confirmtime, completetime,
    status, version
)
SELECT $1, $2::VARCHAR, $3::DOUBLE PRECISION, $4::DOUBLE PRECISION, $5::DOUBLE PRECISION,
       $6::TIMESTAMP, $7::DOUBLE PRECISION, $8::DOUBLE PRECISION, $9::DOUBLE PRECISION,
       $10::TIMESTAMP, $11::TIMESTAMP, $12::TIMESTAMP, $13::INT, $14::BIGINT
FROM removed;
"#;

pub const PING: &str = "SELECT 1;";

pub const SELECT_SESSION_IDENTITY: &str = r#"
SELECT current_setting('application_name') AS origin, pg_backend_pid() AS pid;
"#;
