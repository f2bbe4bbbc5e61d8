use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Which CRM export a bronze file came from. Each export has its own
/// column vocabulary and a slightly different cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// The `leads-forms-accelera` pipeline export (form answers included).
    Leads,
    /// The closer-team pipeline export.
    Closer,
}

/// Columns parsed day-first and rewritten as `YYYY-MM-DD`.
pub const DATE_COLUMNS: &[&str] = &["dt_criacao", "dt_perda", "dt_ganho"];

const LEADS_COLUMNS: &[(&str, &str)] = &[
    ("id", "id"),
    ("created_at", "dt_criacao"),
    ("name", "nome"),
    ("email", "email"),
    ("ddi", "ddi"),
    ("phone", "fone"),
    ("complete_phone", "fone_completo"),
    ("organization_name", "de_organizacao"),
    ("tags", "tags"),
    ("status", "status_atual"),
    ("stage", "estagio"),
    ("value", "valor"),
    ("lost_status", "status_perda"),
    ("user_email", "usuario_email"),
    ("user_name", "usuario_nome"),
    ("user_phone", "usuario_fone"),
    ("user_link", "usuario_link"),
    ("origin", "de_origem"),
    ("won_at", "dt_ganho"),
    ("lost_at", "dt_perda"),
    ("doc", "documento"),
    ("username", "username"),
    ("valid_phone", "fone_validado"),
    ("area_de_atuacao", "area_de_atuacao"),
    ("principais_desafios", "principais_desafios"),
    ("como_ficou_sabendo_d", "como_ficou_sabendo_d"),
    ("disposicao_de_invest", "disposicao_de_invest"),
    ("media_de_faturamento", "media_de_faturamento"),
    ("meta_para_os_proximo", "meta_para_os_proximo"),
    ("momento_atual_na_jor", "momento_atual_na_jor"),
    ("o_que_voce_espera_co", "o_que_voce_espera_co"),
    ("link_do_forms", "link_do_forms"),
    ("meta_de_faturamento", "meta_de_faturamento"),
    ("perfil_profissional", "perfil_profissional"),
    ("para_crescer_um_nego", "para_crescer_um_nego"),
    ("principal_objetivo_h", "principal_objetivo_h"),
    ("qual_e_o_maior_obsta", "qual_e_o_maior_obsta"),
    ("qual_e_sua_prioridad", "qual_e_sua_prioridad"),
    ("sua_posicao_no_merca", "sua_posicao_no_merca"),
    ("deal_notes", "notas_negociacao"),
    ("duplicate_phone", "fone_duplicado"),
    ("whatsapp_number", "whatsapp"),
    ("user", "user"),
    ("currency", "moeda"),
    ("user_id", "userId"),
    ("instagram", "instagram"),
    ("contact_notes", "notas_contato"),
];

const CLOSER_COLUMNS: &[(&str, &str)] = &[
    ("id", "id"),
    ("created_at", "dt_criacao"),
    ("name", "nome"),
    ("email", "email"),
    ("ddi", "ddi"),
    ("phone", "fone"),
    ("complete_phone", "fone_completo"),
    ("organization_name", "de_organizacao"),
    ("tags", "tags"),
    ("status", "status_atual"),
    ("stage", "estagio"),
    ("value", "valor"),
    ("lost_status", "status_perda"),
    ("user_email", "usuario_email"),
    ("user_name", "usuario_nome"),
    ("user_phone", "usuario_fone"),
    ("user_link", "usuario_link"),
    ("lost_at", "dt_perda"),
    ("won_at", "dt_ganho"),
    ("valid_phone", "fl_fone_validado"),
    ("deal_notes", "notas_negociacao"),
    ("employees", "funcionarios"),
    ("faturamento", "faturamento"),
    ("de_acordo_com_invest", "de_acordo_com_invest"),
    ("userId", "userid"),
    ("userid", "userid"),
    ("role", "funcao"),
    ("segment", "segmento"),
    ("url", "url"),
    ("contact_notes", "anotacao_contato"),
    ("user_id", "usuario_id"),
    ("city", "cidade"),
    ("state", "uf"),
    ("currency", "moeda"),
    ("duplicate_phone", "fone_duplicado"),
    ("acesso_instagram", "acesso_instagram"),
    ("user", "usuario"),
];

const CLOSER_EXTRA_COLUMNS: &[&str] = &[
    "fone_whatsapp",
    "documento",
    "aplicativo",
    "anuncio_id",
    "anuncio_nome",
    "formulario_id",
    "formulario_nome",
    "campanha_id",
    "campanha_nome",
];

impl Profile {
    pub fn name(self) -> &'static str {
        match self {
            Profile::Leads => "leads",
            Profile::Closer => "closer",
        }
    }

    /// `(bronze name, silver name)` pairs.
    pub fn column_map(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Profile::Leads => LEADS_COLUMNS,
            Profile::Closer => CLOSER_COLUMNS,
        }
    }

    /// Columns that must exist in silver even when the export lacks them.
    pub fn extra_columns(self) -> &'static [&'static str] {
        match self {
            Profile::Leads => &[],
            Profile::Closer => CLOSER_EXTRA_COLUMNS,
        }
    }

    /// Free-text form answers carry line breaks that break downstream CSV tooling.
    pub fn strips_line_breaks(self) -> bool {
        matches!(self, Profile::Leads)
    }

    /// Bronze names that a correctly refined table must no longer contain.
    pub fn retired_names(self) -> impl Iterator<Item = &'static str> {
        let map = self.column_map();
        map.iter()
            .filter(|(from, to)| from != to)
            .map(|(from, _)| *from)
            .filter(move |from| !map.iter().any(|(_, to)| to == from))
    }

    pub fn bronze_path(self, data_dir: &Path) -> PathBuf {
        match self {
            Profile::Leads => data_dir
                .join("bronze")
                .join("leads-forms-accelera")
                .join("leads-forms-accelera.csv"),
            Profile::Closer => data_dir.join("bronze").join("data").join("closer.csv"),
        }
    }

    pub fn silver_path(self, data_dir: &Path) -> PathBuf {
        match self {
            Profile::Leads => data_dir.join("silver").join("leads-forms-accelera.parquet"),
            Profile::Closer => data_dir
                .join("silver")
                .join("data")
                .join("silver_clint_closer.parquet"),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
